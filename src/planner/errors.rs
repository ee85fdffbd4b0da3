use thiserror::Error;

use crate::Time;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// The requested span lies outside the planner window or has a
    /// non-positive duration.
    #[error("invalid span [{at}, {at}+{duration}) for window [{base}, {base}+{window})")]
    InvalidWindow {
        at: Time,
        duration: u64,
        base: Time,
        window: u64,
    },

    /// Admitting the span would exceed free capacity somewhere in its window.
    #[error("capacity exceeded: requested {requested}, available {available}")]
    ExceedsCapacity { requested: u64, available: u64 },

    /// The requested quantity can never fit, even on an empty timeline.
    #[error("request {requested} exceeds total capacity {capacity}")]
    ExceedsTotal { requested: u64, capacity: u64 },

    /// The holder already owns a live span in this planner.
    #[error("holder {0} already has a span")]
    DuplicateHolder(u64),

    /// A multi-planner request named a resource kind with no dimension.
    #[error("no dimension tracks resource kind '{0}'")]
    UnknownDimension(String),
}
