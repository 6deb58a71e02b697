use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Node '{0}' already exists")]
    DuplicateNode(String),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Control lattice expects {expected} points, got {found}")]
    LatticeShape { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum CorrespondError {
    #[error("Correspondence references node '{0}' which is absent from the graph")]
    MissingNode(String),

    #[error("Correspondence entry '{0}' maps a non-existent node to a non-existent node")]
    NullToNull(String),
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Schedule file declares {found} tasks, current set has {expected}")]
    Mismatch { expected: usize, found: usize },

    #[error("Malformed schedule file at line {line}")]
    Parse { line: usize },
}
