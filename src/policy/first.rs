//! First-match policy: accept the first feasible candidate in traversal
//! order, with no preference among equals.

use crate::graph::pool::ResourcePool;
use crate::interner::{ResourceType, Subsystem};
use crate::jobspec::ResourceReq;
use crate::scoring::{EvalEdgeGroup, ScoringApi, MATCH_MET};

use super::{delegate_policy_base, MatchPolicy, PolicyBase, PolicyError};

#[derive(Debug)]
pub struct FirstMatch {
    base: PolicyBase,
}

impl FirstMatch {
    pub fn new(subsystems: Vec<Subsystem>) -> Self {
        Self {
            base: PolicyBase::new(subsystems),
        }
    }
}

impl MatchPolicy for FirstMatch {
    fn name(&self) -> &'static str {
        "first"
    }

    fn dom_finish_vtx(
        &self,
        _pool: &ResourcePool,
        _subsystem: Subsystem,
        _resources: &[ResourceReq],
        _scoring: &ScoringApi,
    ) -> i64 {
        MATCH_MET
    }

    fn dom_finish_slot(&self, _subsystem: Subsystem, _scoring: &mut ScoringApi) {}

    fn sort_edge_groups(&self, _groups: &mut [EvalEdgeGroup]) {
        // Traversal order is the preference.
    }

    delegate_policy_base!();
}
