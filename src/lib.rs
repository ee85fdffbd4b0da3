//! resmatch - hierarchical resource match-making engine
//!
//! A time-aware match-making library for cluster workload managers: given a
//! job request expressed as a structured resource shape, find a set of
//! concrete resources in a live, annotated resource graph that satisfy the
//! request and either allocate them now, reserve them for a future time, or
//! report unsatisfiability.

pub mod config;
pub mod find;
pub mod graph;
pub mod hostlist;
pub mod idset;
pub mod interner;
pub mod jobspec;
pub mod planner;
pub mod policy;
pub mod scoring;
pub mod service;
pub mod state;
pub mod stats;
pub mod traverser;
pub mod writers;

/// Identifier type for jobs. Jobids are assigned monotonically by the match
/// state table and never reused while the job is alive.
pub type JobId = u64;

/// Wall-clock instants on the scheduling axis, in whole seconds since the
/// epoch.
pub type Time = i64;
