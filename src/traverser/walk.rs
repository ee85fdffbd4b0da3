//! The dominant-subsystem descent.
//!
//! Selection is side-effect free: the walk probes planners and pruning
//! filters but mutates nothing, returning the chosen subtrees as
//! [`Selection`] records. Planner spans are applied only once the whole
//! candidate set is accepted.

use petgraph::stable_graph::NodeIndex;

use crate::graph::ResourceGraph;
use crate::interner::{ResourceType, Subsystem};
use crate::jobspec::{Exclusivity, Jobspec, ResourceReq};
use crate::scoring::{EvalEdge, EvalEdgeGroup, ScoringApi, Selection};

use super::{DfuTraverser, JobMeta};

/// What one vertex visit contributed to its parent's scratchpad.
pub(super) enum DomResult {
    /// The vertex matched a request node; one edge group for its type.
    Matched(ResourceType, EvalEdgeGroup),
    /// Structural vertex: qualified groups bubbled up from beneath.
    Passthrough(Vec<(ResourceType, EvalEdgeGroup)>),
    Unmatched,
}

impl DfuTraverser {
    /// One full selection attempt at `meta.at`. Returns the chosen
    /// subtrees (each rooted at the dominant root) or None when no
    /// feasible candidate set exists at this time.
    pub(super) fn select(
        &mut self,
        g: &ResourceGraph,
        jobspec: &Jobspec,
        root: NodeIndex,
        meta: &JobMeta,
    ) -> Option<Vec<Selection>> {
        let dom = self.policy.dom_subsystem();
        let mut scratch = ScoringApi::new();
        match self.dom_dfv(g, root, &jobspec.resources, meta, true) {
            DomResult::Matched(rtype, group) => scratch.add_group(dom, rtype, group),
            DomResult::Passthrough(groups) => {
                for (rtype, group) in groups {
                    scratch.add_group(dom, rtype, group);
                }
            }
            DomResult::Unmatched => return None,
        }
        if self
            .policy
            .dom_finish_graph(dom, &jobspec.resources, &scratch)
            < 0
        {
            return None;
        }
        let picks = self.choose(&mut scratch, &jobspec.resources, dom)?;
        if !self.aux_ok(g, &picks, meta) {
            return None;
        }
        Some(picks)
    }

    /// Depth-first visit of one vertex against the request nodes in scope.
    fn dom_dfv(
        &mut self,
        g: &ResourceGraph,
        v: NodeIndex,
        resources: &[ResourceReq],
        meta: &JobMeta,
        pristine: bool,
    ) -> DomResult {
        self.preorder += 1;
        let dom = self.policy.dom_subsystem();
        let pool = g.pool(v);
        if !pool.is_up() {
            return DomResult::Unmatched;
        }

        let direct = resources
            .iter()
            .find(|r| !r.is_slot() && r.rtype == pool.rtype);
        if let Some(req) = direct {
            return self.dom_match(g, v, req, meta);
        }
        if resources.iter().any(|r| r.is_slot()) || !pristine {
            // A slot (or an already-broken prefix) anchors the scope here.
            if resources.iter().any(|r| r.is_slot()) {
                return self.dom_anchor(g, v, resources, meta);
            }
            return DomResult::Unmatched;
        }

        // Pristine pass-through: the request prefix may omit graph levels.
        let children = g.children(v, dom);
        if children.is_empty() {
            return DomResult::Unmatched;
        }
        let mut scratch = ScoringApi::new();
        for child in children {
            match self.dom_dfv(g, child, resources, meta, true) {
                DomResult::Matched(rtype, group) => scratch.add_group(dom, rtype, group),
                DomResult::Passthrough(groups) => {
                    for (rtype, group) in groups {
                        scratch.add_group(dom, rtype, group);
                    }
                }
                DomResult::Unmatched => {}
            }
        }
        self.postorder += 1;
        if scratch.is_empty() {
            return DomResult::Unmatched;
        }
        let score = self
            .policy
            .dom_finish_vtx(g.pool(v), dom, resources, &scratch);
        if score < 0 {
            return DomResult::Unmatched;
        }
        // Combine each type's candidates into one group behind this vertex,
        // so the parent scores whole subtrees against each other.
        let mut bubbled = Vec::new();
        for (subsystem, rtype) in scratch.keys().collect::<Vec<_>>() {
            let groups = scratch.take_groups(subsystem, rtype);
            let mut count = 0u64;
            let mut exclusive = false;
            let mut edges = Vec::new();
            for group in groups {
                count += group.count;
                exclusive |= group.exclusive;
                for mut edge in group.edges {
                    wrap_edge(&mut edge, v);
                    edges.push(edge);
                }
            }
            self.policy.sort_edges(&mut edges);
            bubbled.push((
                rtype,
                EvalEdgeGroup {
                    score,
                    count,
                    exclusive,
                    edges,
                },
            ));
        }
        DomResult::Passthrough(bubbled)
    }

    /// The vertex type matches `req` directly.
    fn dom_match(
        &mut self,
        g: &ResourceGraph,
        v: NodeIndex,
        req: &ResourceReq,
        meta: &JobMeta,
    ) -> DomResult {
        let dom = self.policy.dom_subsystem();
        let pool = g.pool(v);
        if let Some(constraint) = &meta.constraint {
            if pool.rtype == ResourceType::node() && !constraint.matches(pool) {
                return DomResult::Unmatched;
            }
        }

        let avail = pool.avail_during(meta.at, meta.duration);
        if avail == 0 {
            return DomResult::Unmatched;
        }
        let exclusive = req.exclusive == Exclusivity::True
            || self.policy.is_exclusive_type(pool.rtype);
        if exclusive {
            if avail < pool.size || !pool.x_ok(meta.at, meta.duration) {
                return DomResult::Unmatched;
            }
            // Exclusive possession extends over the subtree: any granule in
            // use beneath this vertex rules it out.
            if let Some(subplan) = pool.idata.subplans.get(&dom) {
                for rtype in subplan.resource_types() {
                    let cap = subplan.capacity_of(rtype).unwrap_or(0);
                    if subplan.avail_of(rtype, meta.at, meta.duration).unwrap_or(0) < cap {
                        return DomResult::Unmatched;
                    }
                }
            }
        }

        // Prune by subtree aggregates before descending.
        if let Some(subplan) = pool.idata.subplans.get(&dom) {
            for child in &req.with {
                for (rtype, need) in &child.aggregate_needs {
                    if !subplan.tracks(*rtype) {
                        continue;
                    }
                    let free = subplan
                        .avail_of(*rtype, meta.at, meta.duration)
                        .unwrap_or(0);
                    if free < *need {
                        return DomResult::Unmatched;
                    }
                }
            }
        }

        let selection;
        let count;
        if req.with.is_empty() {
            // Granule pool: contribute what is free, bounded by the request
            // range; the parent trims the last contributor.
            count = if exclusive {
                pool.size
            } else {
                avail.min(req.count.max)
            };
            selection = Selection::taken(v, count, exclusive, Vec::new());
        } else {
            let mut scratch = ScoringApi::new();
            self.explore(g, v, &req.with, meta, &mut scratch);
            let chosen = match self.choose(&mut scratch, &req.with, dom) {
                Some(chosen) => chosen,
                None => return DomResult::Unmatched,
            };
            count = 1;
            selection = Selection::taken(v, 1, exclusive, chosen);
            self.postorder += 1;
            let score = self
                .policy
                .dom_finish_vtx(g.pool(v), dom, &req.with, &scratch);
            if score < 0 {
                return DomResult::Unmatched;
            }
            return DomResult::Matched(
                g.pool(v).rtype,
                EvalEdgeGroup::single(score, count, exclusive, selection),
            );
        }

        self.postorder += 1;
        let score = self
            .policy
            .dom_finish_vtx(pool, dom, std::slice::from_ref(req), &ScoringApi::new());
        if score < 0 {
            return DomResult::Unmatched;
        }
        DomResult::Matched(
            pool.rtype,
            EvalEdgeGroup::single(score, count, exclusive, selection),
        )
    }

    /// Anchors slot (and sibling) requests at a structural vertex: the
    /// shapes are formed out of the qualified resources beneath it.
    fn dom_anchor(
        &mut self,
        g: &ResourceGraph,
        v: NodeIndex,
        resources: &[ResourceReq],
        meta: &JobMeta,
    ) -> DomResult {
        let dom = self.policy.dom_subsystem();
        let mut scratch = ScoringApi::new();
        self.explore(g, v, resources, meta, &mut scratch);
        self.postorder += 1;
        let mut bubbled = Vec::new();
        for (subsystem, rtype) in scratch.keys().collect::<Vec<_>>() {
            for mut group in scratch.take_groups(subsystem, rtype) {
                wrap_group(&mut group, v);
                bubbled.push((rtype, group));
            }
        }
        if bubbled.is_empty() {
            DomResult::Unmatched
        } else {
            DomResult::Passthrough(bubbled)
        }
    }

    /// Evaluates a child scope beneath `v`: slot requests are shaped here;
    /// direct requests descend into the children.
    fn explore(
        &mut self,
        g: &ResourceGraph,
        v: NodeIndex,
        resources: &[ResourceReq],
        meta: &JobMeta,
        scratch: &mut ScoringApi,
    ) {
        let dom = self.policy.dom_subsystem();
        for slot_req in resources.iter().filter(|r| r.is_slot()) {
            if let Some(group) = self.dom_slot(g, v, slot_req, meta) {
                scratch.add_group(dom, ResourceType::slot(), group);
            }
        }
        let direct: Vec<ResourceReq> = resources
            .iter()
            .filter(|r| !r.is_slot())
            .cloned()
            .collect();
        if direct.is_empty() {
            return;
        }
        for child in g.children(v, dom) {
            match self.dom_dfv(g, child, &direct, meta, true) {
                DomResult::Matched(rtype, group) => scratch.add_group(dom, rtype, group),
                DomResult::Passthrough(groups) => {
                    for (rtype, group) in groups {
                        scratch.add_group(dom, rtype, group);
                    }
                }
                DomResult::Unmatched => {}
            }
        }
    }

    /// Forms slot groupings beneath `v`: walks the slot shape through the
    /// children, computes how many copies fit, and takes the best-scored
    /// qualified resources for that many.
    fn dom_slot(
        &mut self,
        g: &ResourceGraph,
        v: NodeIndex,
        slot_req: &ResourceReq,
        meta: &JobMeta,
    ) -> Option<EvalEdgeGroup> {
        let dom = self.policy.dom_subsystem();
        let shape = &slot_req.with;
        if shape.is_empty() {
            return None;
        }

        let mut sub = ScoringApi::new();
        for child in g.children(v, dom) {
            match self.dom_dfv(g, child, shape, meta, true) {
                DomResult::Matched(rtype, group) => sub.add_group(dom, rtype, group),
                DomResult::Passthrough(groups) => {
                    for (rtype, group) in groups {
                        sub.add_group(dom, rtype, group);
                    }
                }
                DomResult::Unmatched => {}
            }
        }

        // Slot multiplicity is bounded by the scarcest shape type.
        let mut possible = u64::MAX;
        for req in shape {
            let per_slot = req.count.min.max(1);
            let qualified = sub.qualified_count(dom, req.rtype);
            possible = possible.min(qualified / per_slot);
        }
        possible = possible.min(self.policy.calc_effective_max(slot_req));
        if possible < slot_req.count.min {
            return None;
        }
        let nslots = self.policy.calc_count(slot_req, possible);
        if nslots == 0 {
            return None;
        }

        let exclusive = slot_req.exclusive == Exclusivity::True;
        let mut members = Vec::new();
        for req in shape {
            let need = nslots * req.count.min;
            let mut groups = sub.take_groups(dom, req.rtype);
            self.policy.sort_edge_groups(&mut groups);
            members.extend(take_from_groups(groups, need)?);
        }
        self.policy.dom_finish_slot(dom, &mut sub);

        // One edge per shaped member; the anchor vertex is re-attached by
        // whoever owns this scope.
        Some(EvalEdgeGroup {
            score: crate::scoring::MATCH_MET,
            count: nslots,
            exclusive,
            edges: members
                .into_iter()
                .map(|selection| EvalEdge {
                    qty: 1,
                    score: crate::scoring::MATCH_MET,
                    selection,
                })
                .collect(),
        })
    }

    /// Enforces every request in scope against the scratchpad and takes
    /// just enough of the policy-ordered groups to satisfy them.
    pub(super) fn choose(
        &self,
        scratch: &mut ScoringApi,
        resources: &[ResourceReq],
        dom: Subsystem,
    ) -> Option<Vec<Selection>> {
        let mut picks = Vec::new();
        for req in resources {
            let key = if req.is_slot() {
                ResourceType::slot()
            } else {
                req.rtype
            };
            let qualified = scratch.qualified_count(dom, key);
            if qualified < req.count.min {
                return None;
            }
            let needed = self.policy.calc_count(req, qualified);
            if needed == 0 {
                return None;
            }
            let mut groups = scratch.take_groups(dom, key);
            self.policy.sort_edge_groups(&mut groups);
            picks.extend(take_from_groups(groups, needed)?);
        }
        Some(picks)
    }

    /// Upwalks every auxiliary subsystem from the taken vertices: each
    /// ancestor on an auxiliary path must be UP for the match to stand.
    fn aux_ok(&self, g: &ResourceGraph, picks: &[Selection], _meta: &JobMeta) -> bool {
        let aux: Vec<Subsystem> = self.policy.subsystems()[1..].to_vec();
        if aux.is_empty() {
            return true;
        }
        let mut taken = Vec::new();
        collect_taken(picks, &mut taken);
        for subsystem in aux {
            for &v in &taken {
                let mut cursor = v;
                let mut hops = 0usize;
                while let Some(&parent) = g.parents(cursor, subsystem).first() {
                    if !g.pool(parent).is_up() {
                        return false;
                    }
                    cursor = parent;
                    hops += 1;
                    if hops > g.vertex_count() {
                        break;
                    }
                }
            }
        }
        true
    }
}

fn collect_taken(picks: &[Selection], out: &mut Vec<NodeIndex>) {
    for sel in picks {
        if sel.qty > 0 {
            out.push(sel.vertex);
        }
        collect_taken(&sel.children, out);
    }
}

// Wraps a bubbled edge with a structural parent so the chosen subtree
// keeps its full dominant path.
fn wrap_edge(edge: &mut EvalEdge, parent: NodeIndex) {
    let inner = std::mem::replace(
        &mut edge.selection,
        Selection::structural(parent, Vec::new()),
    );
    edge.selection.children.push(inner);
}

// Wraps every edge of a bubbled group.
fn wrap_group(group: &mut EvalEdgeGroup, parent: NodeIndex) {
    for edge in &mut group.edges {
        wrap_edge(edge, parent);
    }
}

/// Takes policy-ordered groups until `need` is covered. A partially-needed
/// group is consumed edge by edge in its sorted order, trimming the last
/// contributor.
fn take_from_groups(groups: Vec<EvalEdgeGroup>, need: u64) -> Option<Vec<Selection>> {
    let mut got = 0u64;
    let mut out = Vec::new();
    for group in groups {
        if got >= need {
            break;
        }
        let remaining = need - got;
        if group.count <= remaining {
            got += group.count;
            out.extend(group.edges.into_iter().map(|e| e.selection));
            continue;
        }
        for mut edge in group.edges {
            if got >= need {
                break;
            }
            let still = need - got;
            if edge.qty <= still {
                got += edge.qty;
                out.push(edge.selection);
            } else {
                edge.selection.set_taken(still);
                out.push(edge.selection);
                got = need;
            }
        }
    }
    (got >= need).then_some(out)
}
