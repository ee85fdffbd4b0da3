//! Applying and reversing selections.
//!
//! A committed selection touches three layers at every vertex on the chosen
//! paths: the pool planner (taken granules), the exclusivity checker, and
//! the subtree-aggregate pruning filters of every ancestor. Removal and
//! partial cancel reverse the same layers; update replays an R set produced
//! elsewhere onto the live graph.

use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;

use crate::graph::reader::{ResolvedSet, ResourceReader};
use crate::graph::ResourceGraph;
use crate::interner::ResourceType;
use crate::scoring::Selection;
use crate::writers::MatchWriters;
use crate::{JobId, Time};

use super::{DfuTraverser, JobMeta, TraverserError};

/// Result of replaying an R set with `update`.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub r: String,
    pub at: Time,
    pub duration: u64,
}

#[derive(Default)]
struct CommitPlan {
    /// Granules and exclusivity per taken vertex.
    taken: HashMap<NodeIndex, (u64, bool)>,
    /// Subtree aggregates per path vertex (taken and structural).
    aggregates: HashMap<NodeIndex, Vec<(ResourceType, u64)>>,
}

fn fold_selection(
    g: &ResourceGraph,
    plan: &mut CommitPlan,
    sel: &Selection,
) -> Vec<(ResourceType, u64)> {
    let mut subtree: Vec<(ResourceType, u64)> = Vec::new();
    for child in &sel.children {
        for (rtype, qty) in fold_selection(g, plan, child) {
            merge(&mut subtree, rtype, qty);
        }
    }
    // Aggregates at a vertex cover its descendants only; its own granules
    // count toward the ancestors.
    let agg = plan.aggregates.entry(sel.vertex).or_default();
    for (rtype, qty) in &subtree {
        merge(agg, *rtype, *qty);
    }
    if sel.qty > 0 {
        let entry = plan.taken.entry(sel.vertex).or_insert((0, false));
        entry.0 += sel.qty;
        entry.1 |= sel.exclusive;
        merge(&mut subtree, g.pool(sel.vertex).rtype, sel.qty);
    }
    subtree
}

fn merge(into: &mut Vec<(ResourceType, u64)>, rtype: ResourceType, qty: u64) {
    match into.iter_mut().find(|(t, _)| *t == rtype) {
        Some((_, q)) => *q += qty,
        None => into.push((rtype, qty)),
    }
}

// An exclusive take covers its whole dominant subtree.
fn expand_selection(g: &ResourceGraph, dom: crate::interner::Subsystem, mut sel: Selection) -> Selection {
    sel.children = sel
        .children
        .into_iter()
        .map(|c| expand_selection(g, dom, c))
        .collect();
    if sel.qty > 0 && sel.exclusive {
        let have: Vec<NodeIndex> = sel.children.iter().map(|c| c.vertex).collect();
        for child in g.children(sel.vertex, dom) {
            if !have.contains(&child) {
                sel.children.push(full_take(g, dom, child));
            }
        }
    }
    sel
}

fn full_take(g: &ResourceGraph, dom: crate::interner::Subsystem, v: NodeIndex) -> Selection {
    let children = g
        .children(v, dom)
        .into_iter()
        .map(|c| full_take(g, dom, c))
        .collect();
    Selection::taken(v, g.pool(v).size, false, children)
}

impl DfuTraverser {
    /// Claims the full subtree beneath every exclusive take so descendant
    /// granules are reserved and emitted alongside the demanded vertex.
    pub(super) fn expand_exclusive(
        &self,
        g: &ResourceGraph,
        picks: Vec<Selection>,
    ) -> Vec<Selection> {
        let dom = self.policy.dom_subsystem();
        picks
            .into_iter()
            .map(|sel| expand_selection(g, dom, sel))
            .collect()
    }

    /// Applies an accepted selection: planner spans on taken vertices,
    /// exclusivity spans where demanded, and pruning-filter spans at every
    /// vertex on the chosen paths. Any failure rolls back what was applied
    /// so the graph is left exactly as before.
    pub(super) fn commit(
        &mut self,
        g: &mut ResourceGraph,
        picks: &[Selection],
        meta: &JobMeta,
    ) -> Result<(), TraverserError> {
        let mut plan = CommitPlan::default();
        for sel in picks {
            fold_selection(g, &mut plan, sel);
        }
        let applied = self.apply_plan(g, &plan, meta);
        if let Err(e) = applied {
            self.unapply(g, meta.jobid);
            return Err(e);
        }
        Ok(())
    }

    fn apply_plan(
        &mut self,
        g: &mut ResourceGraph,
        plan: &CommitPlan,
        meta: &JobMeta,
    ) -> Result<(), TraverserError> {
        let dom = self.policy.dom_subsystem();
        for (&v, &(qty, exclusive)) in &plan.taken {
            let pool = g.pool_mut(v);
            let effective = if exclusive { pool.size } else { qty };
            pool.schedule
                .plans
                .add_span(meta.at, meta.duration, effective, meta.jobid)?;
            *pool.idata.tags.entry(meta.jobid).or_insert(0) += effective;
            if exclusive {
                pool.schedule
                    .x_checker
                    .add_span(meta.at, meta.duration, 1, meta.jobid)?;
                pool.idata.x_spans.insert(meta.jobid);
            }
        }
        for (&v, counts) in &plan.aggregates {
            if counts.is_empty() {
                continue;
            }
            let pool = g.pool_mut(v);
            if let Some(subplan) = pool.idata.subplans.get_mut(&dom) {
                subplan.add_span(meta.at, meta.duration, counts, meta.jobid)?;
            }
        }
        Ok(())
    }

    // Removes every trace of jobid; used both for cancel and for commit
    // rollback.
    fn unapply(&mut self, g: &mut ResourceGraph, jobid: JobId) {
        let vertices: Vec<NodeIndex> = g.vertices().collect();
        for v in vertices {
            let pool = g.pool_mut(v);
            pool.schedule.plans.remove_span(jobid);
            pool.schedule.x_checker.remove_span(jobid);
            pool.idata.tags.remove(&jobid);
            pool.idata.x_spans.remove(&jobid);
            for subplan in pool.idata.subplans.values_mut() {
                subplan.remove_span(jobid);
            }
        }
    }

    /// Walks the selection and feeds the writers. Structural vertices are
    /// emitted with qty 0 so rank and name context is available.
    pub(super) fn emit(
        &self,
        g: &ResourceGraph,
        picks: &[Selection],
        writers: &mut dyn MatchWriters,
        starttime: Time,
        expiration: Time,
    ) -> Result<String, TraverserError> {
        fn walk(
            g: &ResourceGraph,
            sel: &Selection,
            writers: &mut dyn MatchWriters,
        ) {
            writers.emit_vtx(g, sel.vertex, sel.qty, sel.exclusive);
            for child in &sel.children {
                writers.emit_edg(g, sel.vertex, child.vertex);
                walk(g, child, writers);
            }
        }
        for sel in picks {
            walk(g, sel, writers);
        }
        Ok(writers.emit(starttime, expiration)?)
    }

    /// Replays a serialized R set onto the graph for `jobid` (rehydrating a
    /// job surfaced from above). The reservation lands on every resolved
    /// vertex and on the pruning filters along its dominant path.
    pub fn update(
        &mut self,
        g: &mut ResourceGraph,
        text: &str,
        reader: &mut dyn ResourceReader,
        writers: &mut dyn MatchWriters,
        jobid: JobId,
        at: Time,
        duration: u64,
    ) -> Result<ReplayOutcome, TraverserError> {
        if !self.initialized {
            return Err(TraverserError::NotInitialized);
        }
        let set = reader.resolve(g, text)?;
        let at = set.starttime.unwrap_or(at);
        let duration = match set.expiration {
            Some(end) if end > at => (end - at) as u64,
            _ => duration,
        };
        if duration == 0 {
            return Err(TraverserError::MalformedRequest(
                "update with zero duration".to_owned(),
            ));
        }
        let picks = self.expand_exclusive(g, self.resolved_to_picks(g, &set)?);
        let meta = JobMeta {
            jobid,
            at,
            duration,
            constraint: None,
        };
        self.commit(g, &picks, &meta)?;
        let expiration = at.saturating_add_unsigned(duration);
        let r = self.emit(g, &picks, writers, at, expiration)?;
        Ok(ReplayOutcome { r, at, duration })
    }

    // Rebuilds selection chains (vertex plus its dominant ancestry) from a
    // reader-resolved set.
    fn resolved_to_picks(
        &self,
        g: &ResourceGraph,
        set: &ResolvedSet,
    ) -> Result<Vec<Selection>, TraverserError> {
        let dom = self.policy.dom_subsystem();
        let mut picks = Vec::new();
        for item in &set.items {
            if !g.contains(item.vertex) {
                return Err(TraverserError::MalformedRequest(
                    "resolved vertex no longer in graph".to_owned(),
                ));
            }
            let mut sel = Selection::taken(item.vertex, item.qty, item.exclusive, Vec::new());
            let mut cursor = item.vertex;
            let mut hops = 0usize;
            while let Some(&parent) = g.parents(cursor, dom).first() {
                sel = Selection::structural(parent, vec![sel]);
                cursor = parent;
                hops += 1;
                if hops > g.vertex_count() {
                    return Err(TraverserError::MalformedRequest(
                        "cycle in dominant ancestry".to_owned(),
                    ));
                }
            }
            picks.push(sel);
        }
        Ok(picks)
    }

    /// Removes the allocation/reservation of `jobid` from every planner,
    /// exclusivity checker and pruning filter that holds it. Returns true
    /// when any span was removed.
    pub fn remove(&mut self, g: &mut ResourceGraph, jobid: JobId) -> Result<bool, TraverserError> {
        if !self.initialized {
            return Err(TraverserError::NotInitialized);
        }
        let mut removed = false;
        let vertices: Vec<NodeIndex> = g.vertices().collect();
        for v in vertices {
            let pool = g.pool_mut(v);
            let held = pool.idata.tags.remove(&jobid).is_some()
                || pool.schedule.plans.span_of(jobid).is_some();
            pool.schedule.plans.remove_span(jobid);
            pool.schedule.x_checker.remove_span(jobid);
            pool.idata.x_spans.remove(&jobid);
            for subplan in pool.idata.subplans.values_mut() {
                removed |= subplan.holds(jobid);
                subplan.remove_span(jobid);
            }
            removed |= held;
        }
        Ok(removed)
    }

    /// Partial cancel: subtracts the vertices named by an R subset from the
    /// job's allocation. Returns true when nothing of the job remains.
    pub fn partial_cancel(
        &mut self,
        g: &mut ResourceGraph,
        text: &str,
        reader: &mut dyn ResourceReader,
        jobid: JobId,
    ) -> Result<bool, TraverserError> {
        if !self.initialized {
            return Err(TraverserError::NotInitialized);
        }
        let dom = self.policy.dom_subsystem();
        let set = reader.resolve(g, text)?;
        if set.items.is_empty() {
            return Err(TraverserError::MalformedRequest("empty cancel set".to_owned()));
        }
        let mut ancestors: Vec<NodeIndex> = Vec::new();
        for item in &set.items {
            let v = item.vertex;
            let rtype = g.pool(v).rtype;
            let held = g.pool(v).allocated_to(jobid);
            if held == 0 {
                continue;
            }
            let qty = item.qty.min(held);
            {
                let pool = g.pool_mut(v);
                let fully = pool.schedule.plans.reduce_span(jobid, qty);
                if fully {
                    pool.schedule.x_checker.remove_span(jobid);
                    pool.idata.x_spans.remove(&jobid);
                    pool.idata.tags.remove(&jobid);
                } else if let Some(tag) = pool.idata.tags.get_mut(&jobid) {
                    *tag -= qty;
                }
            }
            // Walk the dominant ancestry, shrinking each tracked aggregate.
            let mut cursor = v;
            let mut hops = 0usize;
            loop {
                if let Some(subplan) = g.pool_mut(cursor).idata.subplans.get_mut(&dom) {
                    subplan.reduce_span(jobid, &[(rtype, qty)]);
                }
                match g.parents(cursor, dom).first() {
                    Some(&parent) => {
                        if !ancestors.contains(&parent) {
                            ancestors.push(parent);
                        }
                        cursor = parent;
                    }
                    None => break,
                }
                hops += 1;
                if hops > g.vertex_count() {
                    return Err(TraverserError::MalformedRequest(
                        "cycle in dominant ancestry".to_owned(),
                    ));
                }
            }
        }
        self.release_drained_ancestors(g, &ancestors, jobid);
        Ok(!self.holds_any(g, jobid))
    }

    // A whole-vertex take (e.g. an exclusive node) drains once every
    // allocated descendant is cancelled; its own span then goes too.
    fn release_drained_ancestors(
        &mut self,
        g: &mut ResourceGraph,
        ancestors: &[NodeIndex],
        jobid: JobId,
    ) {
        let dom = self.policy.dom_subsystem();
        let mut ordered: Vec<NodeIndex> = ancestors.to_vec();
        ordered.sort_by_key(|&v| {
            std::cmp::Reverse(
                g.pool(v)
                    .path_in(dom)
                    .map(|p| p.matches('/').count())
                    .unwrap_or(0),
            )
        });
        for v in ordered {
            if g.pool(v).allocated_to(jobid) == 0 {
                continue;
            }
            let held_below = g
                .subtree(v, dom)
                .into_iter()
                .skip(1)
                .any(|d| g.pool(d).allocated_to(jobid) > 0);
            if !held_below {
                let qty = g.pool(v).allocated_to(jobid);
                let pool = g.pool_mut(v);
                pool.schedule.plans.remove_span(jobid);
                pool.schedule.x_checker.remove_span(jobid);
                pool.idata.tags.remove(&jobid);
                pool.idata.x_spans.remove(&jobid);
                // Its ancestors stop tracking this vertex's granules.
                let rtype = g.pool(v).rtype;
                let mut cursor = v;
                while let Some(&parent) = g.parents(cursor, dom).first() {
                    if let Some(subplan) =
                        g.pool_mut(parent).idata.subplans.get_mut(&dom)
                    {
                        subplan.reduce_span(jobid, &[(rtype, qty)]);
                    }
                    cursor = parent;
                }
            }
        }
    }

    /// True when any planner or exclusivity checker still holds `jobid`.
    pub fn holds_any(&self, g: &ResourceGraph, jobid: JobId) -> bool {
        g.vertices().any(|v| {
            let pool = g.pool(v);
            pool.schedule.plans.span_of(jobid).is_some()
                || pool.schedule.x_checker.span_of(jobid).is_some()
        })
    }

    /// Removes every span of `jobid` unconditionally (full cancel without
    /// subplan pruning; used when the graph shrank under the job).
    pub fn remove_all(&mut self, g: &mut ResourceGraph, jobid: JobId) {
        self.unapply(g, jobid);
    }
}
