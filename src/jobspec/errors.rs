use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobspecError {
    #[error("malformed jobspec: {0}")]
    Malformed(String),

    #[error("jobspec has no resource requests")]
    Empty,

    #[error("count minimum must be at least 1 (got {0})")]
    ZeroCount(u64),

    #[error("count maximum {max} below minimum {min}")]
    MaxBelowMin { min: u64, max: u64 },

    #[error("unknown count operator: {0}")]
    UnknownOperator(String),

    #[error("unknown constraint operator: {0}")]
    UnknownConstraint(String),
}
