//! Service-level error model with errno-style codes for the wire.

use thiserror::Error;

use crate::config::ConfigError;
use crate::find::FindError;
use crate::graph::GraphError;
use crate::jobspec::JobspecError;
use crate::planner::PlannerError;
use crate::policy::PolicyError;
use crate::state::StateError;
use crate::traverser::TraverserError;
use crate::writers::WriterError;
use crate::JobId;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed protocol payload; no state change.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    /// No feasible point in the resource graph exists now.
    #[error("resources unavailable")]
    Busy,

    /// Provably infeasible even at graph end.
    #[error("unsatisfiable request")]
    Unsatisfiable,

    #[error("not found: {0}")]
    NotFound(String),

    /// Update carried a different R for an existing jobid.
    #[error("conflicting resource set for job {0}")]
    Conflict(JobId),

    #[error("exhausted: {0}")]
    Exhausted(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Streaming response terminator.
    #[error("end of data")]
    EndOfData,

    /// Streaming subscription torn down.
    #[error("subscription cancelled")]
    Cancelled,

    /// Graph invariants violated or the acquire stream broke; the reactor
    /// must stop.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ServiceError {
    /// Classic errno value reported on the wire.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Protocol(_) => 71,      // EPROTO
            Self::Invalid(_) => 22,       // EINVAL
            Self::Busy => 16,             // EBUSY
            Self::Unsatisfiable => 19,    // ENODEV
            Self::NotFound(_) => 2,       // ENOENT
            Self::Conflict(_) => 22,      // EINVAL
            Self::Exhausted(_) => 34,     // ERANGE
            Self::Unsupported(_) => 95,   // ENOTSUP
            Self::EndOfData => 61,        // ENODATA
            Self::Cancelled => 125,       // ECANCELED
            Self::Fatal(_) => 5,          // EIO
        }
    }

    /// True when the reactor should stop rather than answer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<TraverserError> for ServiceError {
    fn from(e: TraverserError) -> Self {
        match e {
            TraverserError::Busy => Self::Busy,
            TraverserError::Unsatisfiable => Self::Unsatisfiable,
            TraverserError::NotInitialized => Self::Invalid("no resources acquired".to_owned()),
            TraverserError::MissingSubsystem(s) => Self::Unsupported(s),
            TraverserError::NoAllocation(j) => Self::NotFound(format!("job {j}")),
            TraverserError::MalformedRequest(m) => Self::Invalid(m),
            TraverserError::Graph(e) => e.into(),
            TraverserError::Planner(e) => e.into(),
            TraverserError::Writer(e) => Self::Invalid(e.to_string()),
            TraverserError::Jobspec(e) => Self::Invalid(e.to_string()),
            TraverserError::Find(e) => Self::Invalid(e.to_string()),
        }
    }
}

impl From<GraphError> for ServiceError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::UnknownSubsystem(s) => Self::Unsupported(s),
            GraphError::UnknownPath(p) => Self::NotFound(p),
            GraphError::RemapExists { .. } => Self::Invalid(e.to_string()),
            _ => Self::Invalid(e.to_string()),
        }
    }
}

impl From<PlannerError> for ServiceError {
    fn from(e: PlannerError) -> Self {
        match e {
            PlannerError::ExceedsCapacity { .. } | PlannerError::ExceedsTotal { .. } => {
                Self::Exhausted(e.to_string())
            }
            _ => Self::Invalid(e.to_string()),
        }
    }
}

impl From<StateError> for ServiceError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Exhausted => Self::Exhausted("jobid space".to_owned()),
            StateError::NotFound(j) => Self::NotFound(format!("job {j}")),
            StateError::Exists(j) => Self::Invalid(format!("job {j} already exists")),
        }
    }
}

impl From<JobspecError> for ServiceError {
    fn from(e: JobspecError) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<ConfigError> for ServiceError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<PolicyError> for ServiceError {
    fn from(e: PolicyError) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<WriterError> for ServiceError {
    fn from(e: WriterError) -> Self {
        Self::Invalid(e.to_string())
    }
}

impl From<FindError> for ServiceError {
    fn from(e: FindError) -> Self {
        Self::Invalid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(ServiceError::Busy.errno(), 16);
        assert_eq!(ServiceError::Unsatisfiable.errno(), 19);
        assert_eq!(ServiceError::NotFound("x".into()).errno(), 2);
        assert_eq!(ServiceError::Conflict(1).errno(), 22);
        assert_eq!(ServiceError::EndOfData.errno(), 61);
        assert_eq!(ServiceError::Cancelled.errno(), 125);
    }

    #[test]
    fn traverser_errors_map_through() {
        assert_eq!(ServiceError::from(TraverserError::Busy).errno(), 16);
        assert_eq!(
            ServiceError::from(TraverserError::Unsatisfiable).errno(),
            19
        );
    }

    #[test]
    fn only_fatal_is_fatal() {
        assert!(ServiceError::Fatal("stream".into()).is_fatal());
        assert!(!ServiceError::Busy.is_fatal());
    }
}
