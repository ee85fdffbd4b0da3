//! Locality policy: pack the request under as few common ancestors as
//! possible by preferring the child subtrees that qualify the most
//! resources.

use crate::graph::pool::ResourcePool;
use crate::interner::{ResourceType, Subsystem};
use crate::jobspec::ResourceReq;
use crate::scoring::{EvalEdgeGroup, ScoringApi};

use super::{delegate_policy_base, MatchPolicy, PolicyBase, PolicyError};

#[derive(Debug)]
pub struct Locality {
    base: PolicyBase,
}

impl Locality {
    pub fn new(subsystems: Vec<Subsystem>) -> Self {
        Self {
            base: PolicyBase::new(subsystems),
        }
    }
}

impl MatchPolicy for Locality {
    fn name(&self) -> &'static str {
        "locality"
    }

    /// A vertex is worth the total quantity it qualifies beneath itself, so
    /// denser subtrees outrank sparser ones at the parent.
    fn dom_finish_vtx(
        &self,
        _pool: &ResourcePool,
        subsystem: Subsystem,
        _resources: &[ResourceReq],
        scoring: &ScoringApi,
    ) -> i64 {
        let total: u64 = scoring
            .keys()
            .filter(|(s, _)| *s == subsystem)
            .map(|(s, t)| scoring.qualified_count(s, t))
            .sum();
        total.min(i64::MAX as u64) as i64
    }

    fn dom_finish_slot(&self, _subsystem: Subsystem, _scoring: &mut ScoringApi) {}

    fn sort_edge_groups(&self, groups: &mut [EvalEdgeGroup]) {
        groups.sort_by(|a, b| b.score.cmp(&a.score).then(b.count.cmp(&a.count)));
    }

    fn sort_edges(&self, edges: &mut [crate::scoring::EvalEdge]) {
        edges.sort_by(|a, b| b.qty.cmp(&a.qty).then(b.score.cmp(&a.score)));
    }

    delegate_policy_base!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::Selection;
    use petgraph::stable_graph::NodeIndex;

    #[test]
    fn denser_groups_sort_first() {
        let policy = Locality::new(vec![Subsystem::containment()]);
        let mk = |score, count| {
            EvalEdgeGroup::single(
                score,
                count,
                false,
                Selection::taken(NodeIndex::new(0), count, false, Vec::new()),
            )
        };
        let mut groups = vec![mk(1, 1), mk(4, 4), mk(2, 2)];
        policy.sort_edge_groups(&mut groups);
        let counts: Vec<u64> = groups.iter().map(|g| g.count).collect();
        assert_eq!(counts, vec![4, 2, 1]);
    }
}
