//! Depth-first-and-up traverser.
//!
//! Performs a depth-first visit of the dominant subsystem and an upwalk of
//! each auxiliary subsystem selected by the match policy. Policy callbacks
//! are invoked at well-defined graph-visit events; the traverser either
//! allocates the scored selection now, reserves it at the earliest feasible
//! future point, or tests satisfiability without committing state.

use petgraph::stable_graph::NodeIndex;

use crate::graph::pool::ResourceStatus;
use crate::graph::ResourceGraph;
use crate::interner::{ResourceType, Subsystem};
use crate::jobspec::{Constraint, Jobspec};
use crate::planner::MultiPlanner;
use crate::policy::MatchPolicy;
use crate::writers::MatchWriters;
use crate::{JobId, Time};

pub mod errors;
mod apply;
mod walk;


pub use errors::TraverserError;

/// Schedule operation requested for one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Allocate,
    AllocateOrElseReserve,
    AllocateWithSatisfiability,
    Satisfiability,
    MatchWithoutAllocating,
}

impl MatchOp {
    pub fn parse(cmd: &str) -> Option<Self> {
        match cmd {
            "allocate" => Some(Self::Allocate),
            "allocate_orelse_reserve" => Some(Self::AllocateOrElseReserve),
            "allocate_with_satisfiability" => Some(Self::AllocateWithSatisfiability),
            "satisfiability" => Some(Self::Satisfiability),
            "without_allocating" | "match_without_allocating" => {
                Some(Self::MatchWithoutAllocating)
            }
            _ => None,
        }
    }

    /// Whether a successful run commits planner state.
    pub fn commits(&self) -> bool {
        matches!(self, Self::Allocate | Self::AllocateOrElseReserve
            | Self::AllocateWithSatisfiability)
    }

    fn satisfiability_class(&self) -> bool {
        matches!(self, Self::AllocateWithSatisfiability | Self::Satisfiability)
    }
}

/// Per-run metadata threaded through the walk.
#[derive(Debug, Clone)]
pub(crate) struct JobMeta {
    pub jobid: JobId,
    pub at: Time,
    pub duration: u64,
    pub constraint: Option<Constraint>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// True when the selection starts later than requested (a reservation).
    pub reserved: bool,
    /// Emitted R document; absent for satisfiability-only probes.
    pub r: Option<String>,
    /// Scheduling-loop iterations spent.
    pub iters: u64,
}

/// The traverser: owns the match policy and its walk bookkeeping. The
/// graph is passed in by the caller, which keeps ownership simple under
/// the single-threaded reactor model.
#[derive(Debug)]
pub struct DfuTraverser {
    policy: Box<dyn MatchPolicy>,
    initialized: bool,
    preorder: u64,
    postorder: u64,
    total_preorder: u64,
    total_postorder: u64,
}

impl DfuTraverser {
    pub fn new(policy: Box<dyn MatchPolicy>) -> Self {
        Self {
            policy,
            initialized: false,
            preorder: 0,
            postorder: 0,
            total_preorder: 0,
            total_postorder: 0,
        }
    }

    pub fn policy(&self) -> &dyn MatchPolicy {
        self.policy.as_ref()
    }

    pub fn policy_mut(&mut self) -> &mut Box<dyn MatchPolicy> {
        &mut self.policy
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn total_preorder_count(&self) -> u64 {
        self.total_preorder
    }

    pub fn total_postorder_count(&self) -> u64 {
        self.total_postorder
    }

    /// Primes the pruning filters: for each policy subsystem, walks its
    /// hierarchy depth first and installs a subtree-aggregate planner at
    /// every inner vertex, sized to the descendant capacity of each
    /// registered pruning type.
    pub fn initialize(&mut self, g: &mut ResourceGraph) -> Result<(), TraverserError> {
        self.initialized = false;
        for subsystem in self.policy.subsystems().to_vec() {
            let root = g
                .root(subsystem)
                .map_err(|_| TraverserError::MissingSubsystem(subsystem.as_str().to_owned()))?;
            self.prime_pruning_filter(g, root, subsystem);
        }
        self.initialized = true;
        Ok(())
    }

    // Returns the per-type subtree capacity of v (inclusive); installs
    // filters on the way back up so capacities cover descendants only.
    fn prime_pruning_filter(
        &mut self,
        g: &mut ResourceGraph,
        v: NodeIndex,
        subsystem: Subsystem,
    ) -> Vec<(ResourceType, u64)> {
        let mut below: Vec<(ResourceType, u64)> = Vec::new();
        for child in g.children(v, subsystem) {
            for (rtype, qty) in self.prime_pruning_filter(g, child, subsystem) {
                merge_count(&mut below, rtype, qty);
            }
        }
        let pool = g.pool(v);
        let anchor = pool.rtype;
        let tracked: Vec<(ResourceType, u64)> = self
            .policy
            .pruning_types_for(subsystem, anchor)
            .into_iter()
            .filter_map(|t| {
                below
                    .iter()
                    .find(|(bt, _)| *bt == t)
                    .map(|(_, qty)| (t, *qty))
            })
            .collect();
        let base = g.graph_duration.start;
        let span = g.graph_duration.span();
        let pool = g.pool_mut(v);
        if tracked.is_empty() {
            pool.idata.subplans.remove(&subsystem);
        } else {
            pool.idata
                .subplans
                .insert(subsystem, MultiPlanner::new(base, span, &tracked));
        }
        merge_count(&mut below, pool.rtype, pool.size);
        below
    }

    /// Runs one match: select, then allocate or reserve (or probe only).
    /// `at` carries the requested earliest start in and the actual start
    /// out.
    pub fn run(
        &mut self,
        g: &mut ResourceGraph,
        jobspec: &Jobspec,
        writers: &mut dyn MatchWriters,
        op: MatchOp,
        jobid: JobId,
        at: &mut Time,
    ) -> Result<RunResult, TraverserError> {
        if !self.initialized {
            return Err(TraverserError::NotInitialized);
        }
        let dom = self.policy.dom_subsystem();
        let root = g
            .root(dom)
            .map_err(|_| TraverserError::MissingSubsystem(dom.as_str().to_owned()))?;
        if jobspec.resources.is_empty() {
            return Err(TraverserError::MalformedRequest("empty jobspec".to_owned()));
        }
        self.preorder = 0;
        self.postorder = 0;

        let graph_start = g.graph_duration.start;
        let duration = if jobspec.duration > 0 {
            jobspec.duration
        } else {
            g.graph_duration.span()
        };
        let mut meta = JobMeta {
            jobid,
            at: (*at).max(graph_start),
            duration,
            constraint: jobspec.constraint.clone(),
        };

        let result = if op == MatchOp::Satisfiability {
            self.is_satisfiable(g, jobspec, root, &mut meta)
                .map(|iters| RunResult {
                    reserved: false,
                    r: None,
                    iters,
                })
        } else {
            self.schedule(g, jobspec, writers, op, root, &mut meta, at)
        };
        self.total_preorder += self.preorder;
        self.total_postorder += self.postorder;
        result
    }

    // Probe at the last point of the graph window; never commits.
    fn is_satisfiable(
        &mut self,
        g: &ResourceGraph,
        jobspec: &Jobspec,
        root: NodeIndex,
        meta: &mut JobMeta,
    ) -> Result<u64, TraverserError> {
        self.request_feasible(g, jobspec, meta, MatchOp::Satisfiability)?;
        let graph_end = g.graph_duration.end;
        let probe_at = graph_end
            .checked_sub_unsigned(meta.duration)
            .and_then(|t| t.checked_sub(1))
            .filter(|t| *t >= g.graph_duration.start)
            .ok_or(TraverserError::Unsatisfiable)?;
        meta.at = probe_at;
        match self.select(g, jobspec, root, meta) {
            Some(_) => Ok(1),
            None => Err(TraverserError::Unsatisfiable),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule(
        &mut self,
        g: &mut ResourceGraph,
        jobspec: &Jobspec,
        writers: &mut dyn MatchWriters,
        op: MatchOp,
        root: NodeIndex,
        meta: &mut JobMeta,
        at: &mut Time,
    ) -> Result<RunResult, TraverserError> {
        self.request_feasible(g, jobspec, meta, op)?;
        let requested_at = meta.at;
        let mut iters = 1u64;

        let mut picks = self.select(g, jobspec, root, meta);
        if picks.is_none() {
            match op {
                MatchOp::Allocate | MatchOp::MatchWithoutAllocating => {
                    return Err(TraverserError::Busy);
                }
                MatchOp::AllocateWithSatisfiability => {
                    iters += 1;
                    return match self.probe_graph_end(g, jobspec, root, meta) {
                        true => Err(TraverserError::Busy),
                        false => Err(TraverserError::Unsatisfiable),
                    };
                }
                MatchOp::AllocateOrElseReserve => {
                    for t in self.reserve_candidates(g, jobspec, root, requested_at + 1, meta) {
                        iters += 1;
                        meta.at = t;
                        picks = self.select(g, jobspec, root, meta);
                        if picks.is_some() {
                            break;
                        }
                    }
                    if picks.is_none() {
                        iters += 1;
                        return match self.probe_graph_end(g, jobspec, root, meta) {
                            true => Err(TraverserError::Busy),
                            false => Err(TraverserError::Unsatisfiable),
                        };
                    }
                }
                MatchOp::Satisfiability => return Err(TraverserError::Busy),
            }
        }
        let Some(picks) = picks else {
            return Err(TraverserError::Busy);
        };
        let picks = self.expand_exclusive(g, picks);

        *at = meta.at;
        let graph_end = g.graph_duration.end;
        if *at == graph_end {
            // No scheduleable point short of the very end of time.
            return Err(TraverserError::Busy);
        }
        if *at < g.graph_duration.start || *at > graph_end {
            return Err(TraverserError::MalformedRequest(format!(
                "start {at} outside the graph window"
            )));
        }
        // A job running past the graph expiration is clamped to it.
        if at.saturating_add_unsigned(meta.duration) > graph_end {
            meta.duration = (graph_end - *at) as u64;
        }

        if op.commits() {
            self.commit(g, &picks, meta)?;
        }
        let expiration = meta.at.saturating_add_unsigned(meta.duration);
        let r = self.emit(g, &picks, writers, meta.at, expiration)?;
        Ok(RunResult {
            reserved: meta.at != requested_at,
            r: Some(r),
            iters,
        })
    }

    // True when the request would fit at the end of the window (busy but
    // satisfiable), false when it can never fit.
    fn probe_graph_end(
        &mut self,
        g: &ResourceGraph,
        jobspec: &Jobspec,
        root: NodeIndex,
        meta: &mut JobMeta,
    ) -> bool {
        let probe_at = g
            .graph_duration
            .end
            .checked_sub_unsigned(meta.duration)
            .and_then(|t| t.checked_sub(1))
            .filter(|t| *t >= g.graph_duration.start);
        match probe_at {
            Some(t) => {
                meta.at = t;
                self.select(g, jobspec, root, meta).is_some()
            }
            None => false,
        }
    }

    // Candidate reservation start times from the root pruning filter.
    fn reserve_candidates(
        &self,
        g: &ResourceGraph,
        jobspec: &Jobspec,
        root: NodeIndex,
        from: Time,
        meta: &JobMeta,
    ) -> Vec<Time> {
        let dom = self.policy.dom_subsystem();
        let pool = g.pool(root);
        let Some(subplan) = pool.idata.subplans.get(&dom) else {
            return Vec::new();
        };
        let request: Vec<(ResourceType, u64)> = subplan
            .resource_types()
            .into_iter()
            .map(|t| (t, jobspec.total_need(t)))
            .filter(|(_, q)| *q > 0)
            .collect();
        match subplan.avail_times(from, meta.duration, &request) {
            Ok(iter) => iter.collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Short-circuit feasibility check: are there enough UP (or, for
    /// satisfiability, any) nodes matching the request constraint with
    /// capacity over the probed window?
    fn request_feasible(
        &self,
        g: &ResourceGraph,
        jobspec: &Jobspec,
        meta: &JobMeta,
        op: MatchOp,
    ) -> Result<(), TraverserError> {
        let node = ResourceType::node();
        let target_nodes = jobspec.total_need(node);
        if target_nodes == 0 {
            return Ok(());
        }
        let busy_kind = || {
            if op.satisfiability_class() {
                TraverserError::Unsatisfiable
            } else {
                TraverserError::Busy
            }
        };
        if meta.constraint.is_none() && target_nodes <= g.metadata.nodes_up {
            return Ok(());
        }
        if target_nodes > g.metadata.nodes_up {
            return Err(busy_kind());
        }

        let graph_end = g.graph_duration.end;
        let target_time = if op == MatchOp::Allocate {
            meta.at
        } else {
            graph_end - 1
        };
        let probe_duration = meta
            .duration
            .min((graph_end - target_time).max(1) as u64);
        let mut feasible = 0u64;
        for &v in g.by_type(node) {
            let pool = g.pool(v);
            let constrained_ok = meta
                .constraint
                .as_ref()
                .map(|c| c.matches(pool))
                .unwrap_or(true);
            if constrained_ok
                && (op.satisfiability_class() || pool.is_up())
                && pool
                    .schedule
                    .plans
                    .avail_resources_during(target_time, probe_duration)
                    .unwrap_or(0)
                    >= 1
            {
                feasible += 1;
                if feasible >= target_nodes {
                    return Ok(());
                }
            }
        }
        Err(busy_kind())
    }

    /// Flips status on the subtree at `path` in the dominant subsystem.
    /// Returns the changed ranks.
    pub fn mark(
        &mut self,
        g: &mut ResourceGraph,
        path: &str,
        status: ResourceStatus,
    ) -> Result<Vec<i64>, TraverserError> {
        let dom = self.policy.dom_subsystem();
        let targets = g.by_path(dom, path).to_vec();
        if targets.is_empty() {
            return Err(TraverserError::MalformedRequest(format!(
                "no vertex at path {path}"
            )));
        }
        let mut ranks = Vec::new();
        for v in targets {
            for changed in g.mark_subtree(v, dom, status) {
                let rank = g.pool(changed).rank;
                if rank >= 0 && !ranks.contains(&rank) {
                    ranks.push(rank);
                }
            }
        }
        Ok(ranks)
    }

    /// Flips status for whole ranks (resource-acquire up/down sets).
    pub fn mark_ranks(
        &mut self,
        g: &mut ResourceGraph,
        ranks: &[i64],
        status: ResourceStatus,
    ) -> Vec<i64> {
        let dom = self.policy.dom_subsystem();
        let mut changed_ranks = Vec::new();
        for &rank in ranks {
            let roots: Vec<NodeIndex> = g
                .by_rank(rank)
                .iter()
                .copied()
                .filter(|&v| g.pool(v).rtype == ResourceType::node())
                .collect();
            for v in roots {
                if !g.mark_subtree(v, dom, status).is_empty() && !changed_ranks.contains(&rank) {
                    changed_ranks.push(rank);
                }
            }
        }
        changed_ranks
    }

    /// Evaluates find criteria over every vertex and emits the matches.
    pub fn find(
        &self,
        g: &ResourceGraph,
        writers: &mut dyn MatchWriters,
        criteria: &str,
        now: Time,
    ) -> Result<String, TraverserError> {
        let criteria = crate::find::Criteria::parse(criteria)?;
        let dom = self.policy.dom_subsystem();
        let mut matched: Vec<NodeIndex> = Vec::new();
        // Stable emission order: dominant pre-order where reachable.
        let ordered: Vec<NodeIndex> = match g.root(dom) {
            Ok(root) => g.subtree(root, dom),
            Err(_) => g.vertices().collect(),
        };
        for v in ordered {
            if criteria.matches(g.pool(v), now) {
                matched.push(v);
            }
        }
        for &v in &matched {
            writers.emit_vtx(g, v, g.pool(v).size, false);
        }
        for &v in &matched {
            for child in g.children(v, dom) {
                if matched.contains(&child) {
                    writers.emit_edg(g, v, child);
                }
            }
        }
        Ok(writers.emit(g.graph_duration.start, g.graph_duration.end)?)
    }
}

fn merge_count(into: &mut Vec<(ResourceType, u64)>, rtype: ResourceType, qty: u64) {
    match into.iter_mut().find(|(t, _)| *t == rtype) {
        Some((_, q)) => *q += qty,
        None => into.push((rtype, qty)),
    }
}

/// Reader-resolved update/removal entry points live in `apply`.
pub use apply::ReplayOutcome;
