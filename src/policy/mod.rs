//! Pluggable match policies.
//!
//! A policy is consulted at well-defined graph-visit events: it scores a
//! vertex once its children are evaluated, orders candidate edge groups,
//! decides how many of a granule pool to take, aggregates slot groupings,
//! and accepts or rejects the candidate set at the root. It also owns the
//! registration of pruning types and always-exclusive types.

use std::collections::HashSet;
use std::fmt::Debug;

use thiserror::Error;

use crate::graph::pool::ResourcePool;
use crate::interner::{ResourceType, Subsystem};
use crate::jobspec::ResourceReq;
use crate::scoring::{EvalEdgeGroup, ScoringApi, MATCH_MET};

pub mod first;
pub mod id_based;
pub mod locality;

pub use first::FirstMatch;
pub use id_based::{HighIdFirst, LowIdFirst};
pub use locality::Locality;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown match policy: {0}")]
    UnknownPolicy(String),

    #[error("malformed pruning filter spec: {0}")]
    BadPruningSpec(String),
}

/// Scoring and selection hooks invoked by the traverser.
pub trait MatchPolicy: Debug {
    fn name(&self) -> &'static str;

    /// Subsystems this policy walks; the first is dominant.
    fn subsystems(&self) -> &[Subsystem];

    fn dom_subsystem(&self) -> Subsystem {
        self.subsystems()[0]
    }

    /// Scores a matched vertex once its children are in `scoring`. A
    /// negative return rejects the vertex.
    fn dom_finish_vtx(
        &self,
        pool: &ResourcePool,
        subsystem: Subsystem,
        resources: &[ResourceReq],
        scoring: &ScoringApi,
    ) -> i64;

    /// Aggregates cross-child slot scoring.
    fn dom_finish_slot(&self, subsystem: Subsystem, scoring: &mut ScoringApi);

    /// Accepts or rejects the candidate set at the root. A negative return
    /// rejects the whole match.
    fn dom_finish_graph(
        &self,
        subsystem: Subsystem,
        resources: &[ResourceReq],
        scoring: &ScoringApi,
    ) -> i64 {
        for req in resources {
            if scoring.qualified_count(subsystem, req.rtype) < req.count.min {
                return -1;
            }
        }
        MATCH_MET
    }

    /// Orders candidate edge groups most-preferred first. The traverser
    /// takes groups in this order; equal preference keeps traversal order.
    fn sort_edge_groups(&self, groups: &mut [EvalEdgeGroup]);

    /// Orders the edges inside a group when only part of it is needed.
    /// Default keeps traversal order.
    fn sort_edges(&self, _edges: &mut [crate::scoring::EvalEdge]) {}

    /// How many granules to take for `req` given the qualified quantity.
    /// Zero means the request cannot be met here.
    fn calc_count(&self, req: &ResourceReq, qualified: u64) -> u64 {
        req.count.best_fit(qualified).unwrap_or(0)
    }

    /// Upper bound on slot multiplicity for `req`.
    fn calc_effective_max(&self, req: &ResourceReq) -> u64 {
        req.count.effective_max()
    }

    fn is_pruning_type(&self, subsystem: Subsystem, rtype: ResourceType) -> bool;

    /// Pruning types tracked beneath vertices of `anchor` type.
    fn pruning_types_for(&self, subsystem: Subsystem, anchor: ResourceType) -> Vec<ResourceType>;

    /// One-time registration from a "ANY:core,ANY:node" style spec. The
    /// anchor names the vertex type carrying the filter; ANY and ALL both
    /// mean every vertex type.
    fn set_pruning_types_w_spec(
        &mut self,
        subsystem: Subsystem,
        spec: &str,
    ) -> Result<(), PolicyError>;

    /// Registers a type that is always selected exclusively.
    fn add_exclusive_resource_type(&mut self, rtype: ResourceType);

    fn is_exclusive_type(&self, rtype: ResourceType) -> bool;
}

/// Data and behavior shared by the stock policies.
#[derive(Debug, Clone)]
pub struct PolicyBase {
    subsystems: Vec<Subsystem>,
    /// (anchor, target) registrations per subsystem; anchor None = any.
    pruning: Vec<(Subsystem, Option<ResourceType>, ResourceType)>,
    exclusive_types: HashSet<ResourceType>,
}

impl PolicyBase {
    pub fn new(subsystems: Vec<Subsystem>) -> Self {
        Self {
            subsystems,
            pruning: Vec::new(),
            exclusive_types: HashSet::new(),
        }
    }

    pub fn subsystems(&self) -> &[Subsystem] {
        &self.subsystems
    }

    pub fn is_pruning_type(&self, subsystem: Subsystem, rtype: ResourceType) -> bool {
        self.pruning
            .iter()
            .any(|(s, _, t)| *s == subsystem && *t == rtype)
    }

    pub fn pruning_types_for(
        &self,
        subsystem: Subsystem,
        anchor: ResourceType,
    ) -> Vec<ResourceType> {
        let mut out = Vec::new();
        for (s, a, t) in &self.pruning {
            if *s != subsystem {
                continue;
            }
            let applies = match a {
                None => true,
                Some(a) => *a == anchor,
            };
            if applies && !out.contains(t) {
                out.push(*t);
            }
        }
        out
    }

    pub fn set_pruning_types_w_spec(
        &mut self,
        subsystem: Subsystem,
        spec: &str,
    ) -> Result<(), PolicyError> {
        for elem in spec.split(',') {
            let elem = elem.trim();
            if elem.is_empty() {
                continue;
            }
            let (anchor, target) = elem
                .split_once(':')
                .ok_or_else(|| PolicyError::BadPruningSpec(elem.to_owned()))?;
            let anchor = match anchor {
                "ANY" | "ALL" => None,
                name => Some(ResourceType::intern(name)),
            };
            let target = ResourceType::intern(target);
            if !self
                .pruning
                .iter()
                .any(|(s, a, t)| *s == subsystem && *a == anchor && *t == target)
            {
                self.pruning.push((subsystem, anchor, target));
            }
        }
        Ok(())
    }

    pub fn add_exclusive_resource_type(&mut self, rtype: ResourceType) {
        self.exclusive_types.insert(rtype);
    }

    pub fn is_exclusive_type(&self, rtype: ResourceType) -> bool {
        self.exclusive_types.contains(&rtype)
    }
}

// Delegates the bookkeeping half of MatchPolicy to the embedded PolicyBase.
macro_rules! delegate_policy_base {
    () => {
        fn subsystems(&self) -> &[Subsystem] {
            self.base.subsystems()
        }

        fn is_pruning_type(&self, subsystem: Subsystem, rtype: ResourceType) -> bool {
            self.base.is_pruning_type(subsystem, rtype)
        }

        fn pruning_types_for(
            &self,
            subsystem: Subsystem,
            anchor: ResourceType,
        ) -> Vec<ResourceType> {
            self.base.pruning_types_for(subsystem, anchor)
        }

        fn set_pruning_types_w_spec(
            &mut self,
            subsystem: Subsystem,
            spec: &str,
        ) -> Result<(), PolicyError> {
            self.base.set_pruning_types_w_spec(subsystem, spec)
        }

        fn add_exclusive_resource_type(&mut self, rtype: ResourceType) {
            self.base.add_exclusive_resource_type(rtype)
        }

        fn is_exclusive_type(&self, rtype: ResourceType) -> bool {
            self.base.is_exclusive_type(rtype)
        }
    };
}
pub(crate) use delegate_policy_base;

/// Creates a policy by its configured name. Unknown names are a configure
/// time error.
pub fn create_match_policy(
    name: &str,
    subsystems: Vec<Subsystem>,
) -> Result<Box<dyn MatchPolicy>, PolicyError> {
    match name {
        "first" => Ok(Box::new(FirstMatch::new(subsystems))),
        "high" => Ok(Box::new(HighIdFirst::new(subsystems))),
        "low" => Ok(Box::new(LowIdFirst::new(subsystems))),
        "locality" => Ok(Box::new(Locality::new(subsystems))),
        other => Err(PolicyError::UnknownPolicy(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_knows_stock_policies() {
        let subsystems = vec![Subsystem::containment()];
        for name in ["first", "high", "low", "locality"] {
            let policy = create_match_policy(name, subsystems.clone()).unwrap();
            assert_eq!(policy.name(), name);
            assert_eq!(policy.dom_subsystem(), Subsystem::containment());
        }
    }

    #[test]
    fn factory_rejects_unknown_names() {
        assert_eq!(
            create_match_policy("best", vec![Subsystem::containment()]).unwrap_err(),
            PolicyError::UnknownPolicy("best".to_owned())
        );
    }

    #[test]
    fn pruning_spec_registration() {
        let mut base = PolicyBase::new(vec![Subsystem::containment()]);
        let s = Subsystem::containment();
        base.set_pruning_types_w_spec(s, "ANY:core,node:gpu").unwrap();
        assert!(base.is_pruning_type(s, ResourceType::core()));
        assert!(base.is_pruning_type(s, ResourceType::gpu()));
        assert!(!base.is_pruning_type(s, ResourceType::intern("memory")));
        // gpu is only tracked beneath node anchors.
        assert_eq!(
            base.pruning_types_for(s, ResourceType::intern("cluster")),
            vec![ResourceType::core()]
        );
        assert_eq!(
            base.pruning_types_for(s, ResourceType::node()),
            vec![ResourceType::core(), ResourceType::gpu()]
        );
    }

    #[test]
    fn pruning_spec_rejects_missing_anchor() {
        let mut base = PolicyBase::new(vec![Subsystem::containment()]);
        assert!(matches!(
            base.set_pruning_types_w_spec(Subsystem::containment(), "core"),
            Err(PolicyError::BadPruningSpec(_))
        ));
    }

    #[test]
    fn exclusive_type_registration() {
        let mut base = PolicyBase::new(vec![Subsystem::containment()]);
        base.add_exclusive_resource_type(ResourceType::node());
        assert!(base.is_exclusive_type(ResourceType::node()));
        assert!(!base.is_exclusive_type(ResourceType::core()));
    }
}
