//! Resource pool: the vertex payload of the resource graph.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::interner::{ResourceType, Subsystem};
use crate::planner::{MultiPlanner, Planner};
use crate::{JobId, Time};

/// Capacity of the exclusivity checker: the fixed number of concurrent
/// exclusive holders a pool can track.
pub const X_CHECKER_JOBS: u64 = 0x4000_0000;

/// Operational status of a pool. DOWN pools and their subtrees are excluded
/// from allocation but stay visible to status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceStatus {
    #[default]
    Up,
    Down,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

/// Construction parameters for a pool.
#[derive(Debug, Clone)]
pub struct PoolSpec {
    pub rtype: ResourceType,
    pub basename: String,
    /// Logical id within the basename family; -1 means unnumbered.
    pub id: i64,
    /// Quantity this pool represents (1 core, N MB, ...).
    pub size: u64,
    /// Execution-target rank, -1 when none.
    pub rank: i64,
}

/// Reservation timelines attached to a pool.
#[derive(Debug, Clone)]
pub struct ScheduleData {
    /// The pool's own allocation timeline; capacity equals the pool size.
    pub plans: Planner,
    /// Cross-job exclusion tracker.
    pub x_checker: Planner,
}

/// Traversal bookkeeping attached to a pool.
#[derive(Debug, Clone, Default)]
pub struct InfraData {
    /// Per-subsystem subtree-aggregate pruning filters.
    pub subplans: HashMap<Subsystem, MultiPlanner>,
    /// Jobs holding granules of this pool, with their quantities.
    pub tags: HashMap<JobId, u64>,
    /// Jobs holding this pool exclusively.
    pub x_spans: HashSet<JobId>,
}

/// One vertex of the resource graph.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    pub uniq_id: u64,
    pub rtype: ResourceType,
    pub basename: String,
    pub id: i64,
    /// `basename` concatenated with `id` unless id is -1.
    pub name: String,
    pub size: u64,
    pub rank: i64,
    pub status: ResourceStatus,
    /// Absolute slash-separated path per subsystem this pool appears in.
    pub paths: HashMap<Subsystem, String>,
    /// Runtime-settable key/value annotations.
    pub properties: BTreeMap<String, String>,
    pub schedule: ScheduleData,
    pub idata: InfraData,
}

impl ResourcePool {
    pub fn new(uniq_id: u64, spec: PoolSpec, graph_base: Time, graph_window: u64) -> Self {
        let name = if spec.id < 0 {
            spec.basename.clone()
        } else {
            format!("{}{}", spec.basename, spec.id)
        };
        Self {
            uniq_id,
            name,
            rtype: spec.rtype,
            basename: spec.basename,
            id: spec.id,
            size: spec.size,
            rank: spec.rank,
            status: ResourceStatus::Up,
            paths: HashMap::new(),
            properties: BTreeMap::new(),
            schedule: ScheduleData {
                plans: Planner::new(graph_base, graph_window, spec.size, spec.rtype.as_str()),
                x_checker: Planner::new(graph_base, graph_window, X_CHECKER_JOBS, "x_checker"),
            },
            idata: InfraData::default(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == ResourceStatus::Up
    }

    pub fn path_in(&self, subsystem: Subsystem) -> Option<&str> {
        self.paths.get(&subsystem).map(String::as_str)
    }

    /// Free quantity over the window, zero for DOWN pools.
    pub fn avail_during(&self, at: Time, duration: u64) -> u64 {
        if !self.is_up() {
            return 0;
        }
        self.schedule
            .plans
            .avail_resources_during(at, duration)
            .unwrap_or(0)
    }

    /// True when no job holds this pool exclusively over the window and the
    /// exclusive-holder tracker has headroom for one more.
    pub fn x_ok(&self, at: Time, duration: u64) -> bool {
        self.schedule
            .x_checker
            .avail_resources_during(at, duration)
            .map(|free| free >= 1)
            .unwrap_or(false)
    }

    /// Granules of this pool currently held by `jobid`.
    pub fn allocated_to(&self, jobid: JobId) -> u64 {
        self.idata.tags.get(&jobid).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(basename: &str, id: i64, size: u64) -> PoolSpec {
        PoolSpec {
            rtype: ResourceType::intern(basename),
            basename: basename.to_owned(),
            id,
            size,
            rank: -1,
        }
    }

    #[test]
    fn name_concatenates_basename_and_id() {
        let p = ResourcePool::new(0, spec("core", 3, 1), 0, 100);
        assert_eq!(p.name, "core3");
        let unnumbered = ResourcePool::new(1, spec("cluster", -1, 1), 0, 100);
        assert_eq!(unnumbered.name, "cluster");
    }

    #[test]
    fn planner_capacity_equals_size() {
        let p = ResourcePool::new(0, spec("memory", 0, 16), 0, 100);
        assert_eq!(p.schedule.plans.capacity(), 16);
        assert_eq!(p.avail_during(0, 100), 16);
    }

    #[test]
    fn down_pool_has_no_availability() {
        let mut p = ResourcePool::new(0, spec("node", 0, 1), 0, 100);
        p.status = ResourceStatus::Down;
        assert_eq!(p.avail_during(0, 100), 0);
        assert!(!p.is_up());
    }

    #[test]
    fn exclusivity_checker_headroom() {
        let mut p = ResourcePool::new(0, spec("node", 0, 1), 0, 100);
        assert!(p.x_ok(0, 10));
        p.schedule.x_checker.add_span(0, 100, X_CHECKER_JOBS, 1).unwrap();
        assert!(!p.x_ok(0, 10));
    }
}
