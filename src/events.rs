//! Outbound notifications for observers.
//!
//! The scheduler reports run lifecycle and progress over plain mpsc
//! channels. Notifications are advisory: the scheduler stays correct with
//! zero subscribers, and a dropped receiver simply stops getting messages.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};

use crate::structure::Graph;

#[derive(Debug, Clone)]
pub enum Event {
    ProgressStarted,
    /// Percent of the run completed, `0..=100`.
    ProgressChanged(i32),
    ProgressDone,
    /// A snapshot was selected for display by time scrubbing.
    ActiveGraphChanged(Arc<Graph>),
    HasReset,
}

#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn emit(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
