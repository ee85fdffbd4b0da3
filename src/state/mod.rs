//! Match bookkeeping: the job table and allocation/reservation indices.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::{JobId, Time};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("jobid space exhausted")]
    Exhausted,

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} already exists")]
    Exists(JobId),
}

/// Lifecycle state of a job known to the match state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Init,
    Allocated,
    Reserved,
    Matched,
    Canceled,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Allocated => "ALLOCATED",
            Self::Reserved => "RESERVED",
            Self::Matched => "MATCHED",
            Self::Canceled => "CANCELED",
            Self::Error => "ERROR",
        }
    }
}

/// Everything recorded about one job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub jobid: JobId,
    pub state: JobState,
    pub scheduled_at: Time,
    pub duration: u64,
    pub jobspec: String,
    /// Canonical emitted resource set; present iff allocated or reserved.
    pub r: Option<String>,
    /// Match wall time in seconds.
    pub overhead: f64,
}

/// Cached R-set JSON for the common status queries, with per-entry dirty
/// tracking so recomputation only happens when the underlying sets change.
#[derive(Debug, Clone, Default)]
pub struct StatusCache {
    all: Option<String>,
    down: Option<String>,
    allocated: Option<String>,
}

impl StatusCache {
    pub fn all(&self) -> Option<&str> {
        self.all.as_deref()
    }

    pub fn down(&self) -> Option<&str> {
        self.down.as_deref()
    }

    pub fn allocated(&self) -> Option<&str> {
        self.allocated.as_deref()
    }

    pub fn store_all(&mut self, r: String) {
        self.all = Some(r);
    }

    pub fn store_down(&mut self, r: String) {
        self.down = Some(r);
    }

    pub fn store_allocated(&mut self, r: String) {
        self.allocated = Some(r);
    }

    /// Status changes invalidate the status-derived entries.
    pub fn dirty_status(&mut self) {
        self.down = None;
        self.all = None;
    }

    /// Allocation changes invalidate the allocation-derived entry.
    pub fn dirty_allocations(&mut self) {
        self.allocated = None;
    }

    pub fn dirty_all(&mut self) {
        *self = Self::default();
    }
}

/// Tables of jobs, allocations and reservations.
#[derive(Debug, Clone, Default)]
pub struct MatchState {
    jobs: BTreeMap<JobId, JobInfo>,
    allocations: BTreeSet<JobId>,
    reservations: BTreeSet<JobId>,
    pub cache: StatusCache,
}

impl MatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next free jobid: max(live)+1, or 0 when the table is empty.
    pub fn next_jobid(&self) -> Result<JobId, StateError> {
        match self.jobs.keys().next_back() {
            None => Ok(0),
            Some(&max) => max.checked_add(1).ok_or(StateError::Exhausted),
        }
    }

    pub fn is_existent(&self, jobid: JobId) -> bool {
        self.jobs.contains_key(&jobid)
    }

    pub fn job(&self, jobid: JobId) -> Option<&JobInfo> {
        self.jobs.get(&jobid)
    }

    pub fn job_mut(&mut self, jobid: JobId) -> Option<&mut JobInfo> {
        self.jobs.get_mut(&jobid)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobInfo> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn allocations(&self) -> &BTreeSet<JobId> {
        &self.allocations
    }

    pub fn reservations(&self) -> &BTreeSet<JobId> {
        &self.reservations
    }

    /// Records a fresh match result. Allocated and reserved jobs land in
    /// their respective indices; matched-only jobs are tracked in neither.
    pub fn record(&mut self, info: JobInfo) -> Result<(), StateError> {
        if self.jobs.contains_key(&info.jobid) {
            return Err(StateError::Exists(info.jobid));
        }
        match info.state {
            JobState::Allocated => {
                self.allocations.insert(info.jobid);
                self.cache.dirty_allocations();
            }
            JobState::Reserved => {
                self.reservations.insert(info.jobid);
            }
            _ => {}
        }
        self.jobs.insert(info.jobid, info);
        Ok(())
    }

    /// Removes a job entirely (full cancel).
    pub fn remove(&mut self, jobid: JobId) -> Result<JobInfo, StateError> {
        let info = self.jobs.remove(&jobid).ok_or(StateError::NotFound(jobid))?;
        if self.allocations.remove(&jobid) {
            self.cache.dirty_allocations();
        }
        self.reservations.remove(&jobid);
        Ok(info)
    }

    /// Flags a job whose cancel path failed; the jobid stays reserved so
    /// the layer above can retry.
    pub fn mark_error(&mut self, jobid: JobId) -> Result<(), StateError> {
        let info = self.jobs.get_mut(&jobid).ok_or(StateError::NotFound(jobid))?;
        info.state = JobState::Error;
        if self.allocations.remove(&jobid) {
            self.cache.dirty_allocations();
        }
        self.reservations.remove(&jobid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(jobid: JobId, state: JobState) -> JobInfo {
        JobInfo {
            jobid,
            state,
            scheduled_at: 0,
            duration: 10,
            jobspec: String::new(),
            r: matches!(state, JobState::Allocated | JobState::Reserved)
                .then(|| "{}".to_owned()),
            overhead: 0.0,
        }
    }

    #[test]
    fn next_jobid_starts_at_zero_and_follows_max() {
        let mut state = MatchState::new();
        assert_eq!(state.next_jobid().unwrap(), 0);
        state.record(info(5, JobState::Allocated)).unwrap();
        assert_eq!(state.next_jobid().unwrap(), 6);
        state.record(info(2, JobState::Reserved)).unwrap();
        assert_eq!(state.next_jobid().unwrap(), 6);
    }

    #[test]
    fn next_jobid_saturates() {
        let mut state = MatchState::new();
        state.record(info(JobId::MAX, JobState::Allocated)).unwrap();
        assert_eq!(state.next_jobid(), Err(StateError::Exhausted));
    }

    #[test]
    fn record_routes_to_indices() {
        let mut state = MatchState::new();
        state.record(info(1, JobState::Allocated)).unwrap();
        state.record(info(2, JobState::Reserved)).unwrap();
        state.record(info(3, JobState::Matched)).unwrap();
        assert!(state.allocations().contains(&1));
        assert!(state.reservations().contains(&2));
        assert!(!state.allocations().contains(&3));
        assert!(!state.reservations().contains(&3));
        assert!(state.is_existent(3));
    }

    #[test]
    fn duplicate_jobid_rejected() {
        let mut state = MatchState::new();
        state.record(info(1, JobState::Allocated)).unwrap();
        assert_eq!(
            state.record(info(1, JobState::Allocated)),
            Err(StateError::Exists(1))
        );
    }

    #[test]
    fn remove_clears_indices() {
        let mut state = MatchState::new();
        state.record(info(1, JobState::Allocated)).unwrap();
        state.remove(1).unwrap();
        assert!(!state.is_existent(1));
        assert!(state.allocations().is_empty());
        assert!(matches!(state.remove(1), Err(StateError::NotFound(1))));
    }

    #[test]
    fn mark_error_keeps_jobid_reserved() {
        let mut state = MatchState::new();
        state.record(info(1, JobState::Allocated)).unwrap();
        state.mark_error(1).unwrap();
        assert_eq!(state.job(1).unwrap().state, JobState::Error);
        assert!(!state.allocations().contains(&1));
        assert!(state.is_existent(1));
        // The id stays taken, so the next jobid moves past it.
        assert_eq!(state.next_jobid().unwrap(), 2);
    }

    #[test]
    fn cache_dirty_tracking() {
        let mut state = MatchState::new();
        state.cache.store_allocated("{}".to_owned());
        state.record(info(1, JobState::Allocated)).unwrap();
        assert!(state.cache.allocated().is_none());
        state.cache.store_down("{}".to_owned());
        state.cache.dirty_status();
        assert!(state.cache.down().is_none());
    }
}
