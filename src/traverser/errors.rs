use thiserror::Error;

use crate::find::FindError;
use crate::graph::GraphError;
use crate::jobspec::JobspecError;
use crate::planner::PlannerError;
use crate::writers::WriterError;

#[derive(Debug, Error)]
pub enum TraverserError {
    #[error("traverser is not initialized")]
    NotInitialized,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("subsystem root missing: {0}")]
    MissingSubsystem(String),

    /// No feasible point exists now (allocate) or at any enumerated future
    /// point (reserve).
    #[error("resources unavailable")]
    Busy,

    /// Provably infeasible even at graph end given the up resources.
    #[error("request is unsatisfiable")]
    Unsatisfiable,

    #[error("job {0} holds no resources")]
    NoAllocation(u64),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    Jobspec(#[from] JobspecError),

    #[error(transparent)]
    Find(#[from] FindError),
}
