//! Per-walk match scratchpad.
//!
//! During a traversal every visited vertex accumulates the evaluated edge
//! groups of its children into a [`ScoringApi`] keyed by (subsystem, type).
//! The policy orders the groups; the traverser then takes just enough of
//! them to satisfy the request, recording the chosen subtrees as
//! [`Selection`]s that are later walked to update planners and emit R.

use petgraph::stable_graph::NodeIndex;

use crate::interner::{ResourceType, Subsystem};

/// Baseline "no contribution" score. Higher integral scores are better;
/// negative scores mean rejection.
pub const MATCH_MET: i64 = 0;

/// A chosen subtree: the vertex, how many of its granules are taken (0 for
/// structural pass-through vertices on the path), and the chosen children.
#[derive(Debug, Clone)]
pub struct Selection {
    pub vertex: NodeIndex,
    pub qty: u64,
    pub exclusive: bool,
    pub children: Vec<Selection>,
}

impl Selection {
    pub fn taken(vertex: NodeIndex, qty: u64, exclusive: bool, children: Vec<Selection>) -> Self {
        Self {
            vertex,
            qty,
            exclusive,
            children,
        }
    }

    /// A path vertex that contributes no granules of its own.
    pub fn structural(vertex: NodeIndex, children: Vec<Selection>) -> Self {
        Self {
            vertex,
            qty: 0,
            exclusive: false,
            children,
        }
    }

    /// Adjusts the taken quantity along a single-child structural chain
    /// down to the contributing vertex (partial take of a granule pool).
    pub fn set_taken(&mut self, qty: u64) {
        if self.qty > 0 || self.children.is_empty() {
            self.qty = qty;
            return;
        }
        if self.children.len() == 1 {
            self.children[0].set_taken(qty);
        }
    }
}

/// One evaluated child edge with the quantity it supplies and the score of
/// the subtree behind it.
#[derive(Debug, Clone)]
pub struct EvalEdge {
    pub qty: u64,
    pub score: i64,
    pub selection: Selection,
}

/// A group of evaluated edges that stands or falls together.
#[derive(Debug, Clone)]
pub struct EvalEdgeGroup {
    pub score: i64,
    pub count: u64,
    pub exclusive: bool,
    pub edges: Vec<EvalEdge>,
}

impl EvalEdgeGroup {
    pub fn single(score: i64, count: u64, exclusive: bool, selection: Selection) -> Self {
        Self {
            score,
            count,
            exclusive,
            edges: vec![EvalEdge {
                qty: count,
                score,
                selection,
            }],
        }
    }
}

/// Scratchpad keyed by (subsystem, type), iterating in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ScoringApi {
    entries: Vec<((Subsystem, ResourceType), Vec<EvalEdgeGroup>)>,
}

impl ScoringApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, subsystem: Subsystem, rtype: ResourceType, group: EvalEdgeGroup) {
        match self.entry_mut(subsystem, rtype) {
            Some(groups) => groups.push(group),
            None => self.entries.push(((subsystem, rtype), vec![group])),
        }
    }

    fn entry_mut(
        &mut self,
        subsystem: Subsystem,
        rtype: ResourceType,
    ) -> Option<&mut Vec<EvalEdgeGroup>> {
        self.entries
            .iter_mut()
            .find(|((s, t), _)| *s == subsystem && *t == rtype)
            .map(|(_, groups)| groups)
    }

    pub fn groups(&self, subsystem: Subsystem, rtype: ResourceType) -> &[EvalEdgeGroup] {
        self.entries
            .iter()
            .find(|((s, t), _)| *s == subsystem && *t == rtype)
            .map(|(_, groups)| groups.as_slice())
            .unwrap_or(&[])
    }

    pub fn groups_mut(
        &mut self,
        subsystem: Subsystem,
        rtype: ResourceType,
    ) -> Option<&mut Vec<EvalEdgeGroup>> {
        self.entry_mut(subsystem, rtype)
    }

    /// Removes and returns all groups for a key.
    pub fn take_groups(&mut self, subsystem: Subsystem, rtype: ResourceType) -> Vec<EvalEdgeGroup> {
        match self
            .entries
            .iter()
            .position(|((s, t), _)| *s == subsystem && *t == rtype)
        {
            Some(pos) => self.entries.remove(pos).1,
            None => Vec::new(),
        }
    }

    /// Total satisfying quantity accumulated for a key.
    pub fn qualified_count(&self, subsystem: Subsystem, rtype: ResourceType) -> u64 {
        self.groups(subsystem, rtype).iter().map(|g| g.count).sum()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = (Subsystem, ResourceType)> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    /// Drains the whole scratchpad in insertion order.
    pub fn drain(&mut self) -> Vec<((Subsystem, ResourceType), Vec<EvalEdgeGroup>)> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> (Subsystem, ResourceType) {
        (Subsystem::containment(), ResourceType::core())
    }

    fn group(score: i64, count: u64) -> EvalEdgeGroup {
        EvalEdgeGroup::single(
            score,
            count,
            false,
            Selection::taken(NodeIndex::new(0), count, false, Vec::new()),
        )
    }

    #[test]
    fn qualified_count_sums_groups() {
        let (s, t) = key();
        let mut api = ScoringApi::new();
        api.add_group(s, t, group(0, 2));
        api.add_group(s, t, group(0, 3));
        assert_eq!(api.qualified_count(s, t), 5);
        assert_eq!(api.qualified_count(s, ResourceType::gpu()), 0);
    }

    #[test]
    fn groups_keep_insertion_order() {
        let (s, t) = key();
        let mut api = ScoringApi::new();
        api.add_group(s, t, group(7, 1));
        api.add_group(s, t, group(3, 1));
        api.add_group(s, t, group(5, 1));
        let scores: Vec<i64> = api.groups(s, t).iter().map(|g| g.score).collect();
        assert_eq!(scores, vec![7, 3, 5]);
    }

    #[test]
    fn take_groups_empties_key() {
        let (s, t) = key();
        let mut api = ScoringApi::new();
        api.add_group(s, t, group(0, 1));
        assert_eq!(api.take_groups(s, t).len(), 1);
        assert!(api.groups(s, t).is_empty());
        assert!(api.take_groups(s, t).is_empty());
    }

    #[test]
    fn set_taken_descends_structural_chain() {
        let leaf = Selection::taken(NodeIndex::new(2), 4, false, Vec::new());
        let mut wrapped =
            Selection::structural(NodeIndex::new(0), vec![Selection::structural(
                NodeIndex::new(1),
                vec![leaf],
            )]);
        wrapped.set_taken(1);
        assert_eq!(wrapped.children[0].children[0].qty, 1);
        assert_eq!(wrapped.qty, 0);
    }
}
