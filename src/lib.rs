#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod correspond;
mod depend;
mod error;
mod events;
mod history;
mod relink;
mod schedule;
mod scheduler;
mod structure;
mod task;

pub use crate::correspond::Correspondence;
pub use crate::error::{CorrespondError, GraphError, ScheduleError};
pub use crate::events::Event;
pub use crate::history::History;
pub use crate::schedule::{Schedule, Slot};
pub use crate::scheduler::{DEFAULT_TIME_STEP, Scheduler, StopHandle};
pub use crate::structure::{Graph, Link, NULL_TOKEN, Node, NodeKind};
pub use crate::task::{DEFAULT_LENGTH, Task, TaskKind};
