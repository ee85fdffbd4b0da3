use thiserror::Error;

use crate::planner::PlannerError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("malformed resource spec: {0}")]
    MalformedSpec(String),

    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    #[error("no vertex at path: {0}")]
    UnknownPath(String),

    #[error("vertex not in graph")]
    InvalidVertex,

    #[error("namespace remap already registered for rank {rank} {rtype} id {from}")]
    RemapExists { rank: i64, rtype: String, from: u64 },

    #[error("reader does not support this operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Planner(#[from] PlannerError),
}
