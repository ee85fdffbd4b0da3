//! Id-ordered policies: prefer candidates with the lexicographically
//! highest or lowest vertex id.

use crate::graph::pool::ResourcePool;
use crate::interner::{ResourceType, Subsystem};
use crate::jobspec::ResourceReq;
use crate::scoring::{EvalEdgeGroup, ScoringApi};

use super::{delegate_policy_base, MatchPolicy, PolicyBase, PolicyError};

/// Scores a vertex by its logical id shifted to stay non-negative
/// (unnumbered pools carry id -1).
fn id_score(pool: &ResourcePool) -> i64 {
    pool.id + 1
}

#[derive(Debug)]
pub struct HighIdFirst {
    base: PolicyBase,
}

impl HighIdFirst {
    pub fn new(subsystems: Vec<Subsystem>) -> Self {
        Self {
            base: PolicyBase::new(subsystems),
        }
    }
}

impl MatchPolicy for HighIdFirst {
    fn name(&self) -> &'static str {
        "high"
    }

    fn dom_finish_vtx(
        &self,
        pool: &ResourcePool,
        _subsystem: Subsystem,
        _resources: &[ResourceReq],
        _scoring: &ScoringApi,
    ) -> i64 {
        id_score(pool)
    }

    fn dom_finish_slot(&self, _subsystem: Subsystem, _scoring: &mut ScoringApi) {}

    fn sort_edge_groups(&self, groups: &mut [EvalEdgeGroup]) {
        groups.sort_by(|a, b| b.score.cmp(&a.score));
    }

    fn sort_edges(&self, edges: &mut [crate::scoring::EvalEdge]) {
        edges.sort_by(|a, b| b.score.cmp(&a.score));
    }

    delegate_policy_base!();
}

#[derive(Debug)]
pub struct LowIdFirst {
    base: PolicyBase,
}

impl LowIdFirst {
    pub fn new(subsystems: Vec<Subsystem>) -> Self {
        Self {
            base: PolicyBase::new(subsystems),
        }
    }
}

impl MatchPolicy for LowIdFirst {
    fn name(&self) -> &'static str {
        "low"
    }

    fn dom_finish_vtx(
        &self,
        pool: &ResourcePool,
        _subsystem: Subsystem,
        _resources: &[ResourceReq],
        _scoring: &ScoringApi,
    ) -> i64 {
        id_score(pool)
    }

    fn dom_finish_slot(&self, _subsystem: Subsystem, _scoring: &mut ScoringApi) {}

    fn sort_edge_groups(&self, groups: &mut [EvalEdgeGroup]) {
        groups.sort_by(|a, b| a.score.cmp(&b.score));
    }

    fn sort_edges(&self, edges: &mut [crate::scoring::EvalEdge]) {
        edges.sort_by(|a, b| a.score.cmp(&b.score));
    }

    delegate_policy_base!();
}
