//! The execution run's output: one graph snapshot per frame.

use std::sync::{Arc, RwLock};

use crate::structure::Graph;

/// An append-only sequence of graph snapshots.
///
/// Cloning a `History` is cheap and shares the underlying storage, which is
/// how a scrubbing reader observes a run in progress: appends take the
/// write lock, so any index below the current length is a fully written
/// snapshot. Entry 0 is the state right after pre-run setup.
#[derive(Debug, Clone, Default)]
pub struct History {
    frames: Arc<RwLock<Vec<Arc<Graph>>>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, graph: Graph) {
        self.frames.write().unwrap().push(Arc::new(graph));
    }

    pub(crate) fn clear(&self) {
        self.frames.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.frames.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.read().unwrap().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Graph>> {
        self.frames.read().unwrap().get(index).cloned()
    }

    pub fn last(&self) -> Option<Arc<Graph>> {
        self.frames.read().unwrap().last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_storage() {
        let history = History::new();
        let reader = history.clone();

        history.push(Graph::new());
        history.push(Graph::new());

        assert_eq!(reader.len(), 2);
        assert!(reader.get(1).is_some());
        assert!(reader.get(2).is_none());
    }
}
