//! The request/response surface of the match-making engine.
//!
//! One [`ResourceService`] owns the graph, the traverser, the match state
//! and the performance counters, and serves every wire topic from a single
//! reactor thread: the graph is mutated without locks, requests are handled
//! strictly in arrival order, and match attempts never interleave.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, TraverserPolicy};
use crate::graph::pool::ResourceStatus;
use crate::graph::reader::{create_reader, ResourceReader};
use crate::graph::{GraphDuration, ResourceGraph, NO_EXPIRATION};
use crate::idset;
use crate::interner::{ResourceType, Subsystem};
use crate::jobspec::Jobspec;
use crate::policy::create_match_policy;
use crate::state::{JobInfo, JobState, MatchState};
use crate::stats::MatchPerf;
use crate::traverser::{DfuTraverser, MatchOp};
use crate::writers::create_match_writers;
use crate::{JobId, Time};

pub mod errors;
pub mod requests;

#[cfg(test)]
mod tests;

pub use errors::ServiceError;
pub use requests::*;

/// The core service: graph, traverser, match state, perf, notify routes.
#[derive(Debug)]
pub struct ResourceService {
    config: Config,
    graph: ResourceGraph,
    traverser: DfuTraverser,
    state: MatchState,
    perf: MatchPerf,
    subscribers: HashMap<Uuid, ()>,
    pending_notify: Vec<(Uuid, NotifyUpdate)>,
    acquired: bool,
}

fn wall_now() -> Time {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Time)
        .unwrap_or(0)
}

impl ResourceService {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let subsystems: Vec<Subsystem> = config
            .subsystems
            .iter()
            .map(|s| Subsystem::intern(s))
            .collect();
        let mut policy = create_match_policy(&config.match_policy, subsystems.clone())?;
        for subsystem in &subsystems {
            policy.set_pruning_types_w_spec(*subsystem, &config.prune_filters)?;
        }
        if config.traverser_policy == TraverserPolicy::Flexible {
            warn!("flexible traverser policy is not implemented; using simple");
        }
        Ok(Self {
            config,
            graph: ResourceGraph::new(GraphDuration {
                start: 0,
                end: NO_EXPIRATION,
            }),
            traverser: DfuTraverser::new(policy),
            state: MatchState::new(),
            perf: MatchPerf::default(),
            subscribers: HashMap::new(),
            pending_notify: Vec::new(),
            acquired: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    // Reference time clamped into the graph window so probes stay valid.
    fn now(&self) -> Time {
        wall_now().clamp(
            self.graph.graph_duration.start,
            self.graph.graph_duration.end.saturating_sub(1),
        )
    }

    fn ensure_acquired(&self) -> Result<(), ServiceError> {
        if self.acquired {
            Ok(())
        } else {
            Err(ServiceError::Invalid("no resources acquired".to_owned()))
        }
    }

    fn match_reader(&self) -> Result<Box<dyn ResourceReader>, ServiceError> {
        Ok(create_reader(&self.config.match_format)?)
    }

    /// Applies one message of the resource-acquire stream. The initial
    /// `resources` object rebuilds the graph; afterwards only deltas
    /// arrive. When an id appears in both a status set and `shrink`,
    /// shrink wins.
    pub fn apply_acquire(&mut self, update: &AcquireUpdate) -> Result<(), ServiceError> {
        let shrink: Vec<i64> = match &update.shrink {
            Some(s) => idset::parse(s)
                .map_err(|e| ServiceError::Protocol(e.to_string()))?
                .into_iter()
                .map(|r| r as i64)
                .collect(),
            None => Vec::new(),
        };

        if let Some(resources) = &update.resources {
            let t0 = Instant::now();
            let starttime = resources["execution"]["starttime"]
                .as_f64()
                .map(|t| t as Time)
                .unwrap_or_else(wall_now);
            let expiration = update
                .expiration
                .or_else(|| resources["execution"]["expiration"].as_f64())
                .map(|t| t as Time)
                .filter(|&t| t > 0)
                .unwrap_or(NO_EXPIRATION);
            let mut graph = ResourceGraph::new(GraphDuration {
                start: starttime,
                end: expiration.max(starttime + 1),
            });
            let mut reader = create_reader("rv1exec")?;
            graph
                .load(&resources.to_string(), reader.as_mut(), -1)
                .map_err(|e| ServiceError::Fatal(format!("initial load: {e}")))?;
            self.graph = graph;
            crate::interner::finalize();
            self.traverser
                .initialize(&mut self.graph)
                .map_err(|e| ServiceError::Fatal(format!("initialize: {e}")))?;
            self.perf.load = t0.elapsed().as_secs_f64();
            self.perf.graph_loaded_at = wall_now();
            self.perf.last_reset_at = wall_now();
            self.acquired = true;
            self.state.cache.dirty_all();
            debug!(
                vertices = self.graph.vertex_count(),
                edges = self.graph.edge_count(),
                "resource graph acquired"
            );
        }

        if !shrink.is_empty() {
            self.ensure_acquired()?;
            let dom = self.dom();
            for &rank in &shrink {
                let doomed: Vec<_> = self
                    .graph
                    .by_rank(rank)
                    .iter()
                    .copied()
                    .filter(|&v| self.graph.pool(v).rtype == ResourceType::node())
                    .collect();
                for v in doomed {
                    self.graph.remove_subtree(v, dom);
                }
            }
            // Subtree capacities changed; pruning filters are re-primed.
            self.traverser
                .initialize(&mut self.graph)
                .map_err(|e| ServiceError::Fatal(format!("re-prime after shrink: {e}")))?;
            self.state.cache.dirty_all();
        }

        let mut up_changed: Vec<i64> = Vec::new();
        let mut down_changed: Vec<i64> = Vec::new();
        if let Some(up) = &update.up {
            self.ensure_acquired()?;
            let ranks: Vec<i64> = idset::parse(up)
                .map_err(|e| ServiceError::Protocol(e.to_string()))?
                .into_iter()
                .map(|r| r as i64)
                .filter(|r| !shrink.contains(r))
                .collect();
            up_changed = self
                .traverser
                .mark_ranks(&mut self.graph, &ranks, ResourceStatus::Up);
        }
        if let Some(down) = &update.down {
            self.ensure_acquired()?;
            let ranks: Vec<i64> = idset::parse(down)
                .map_err(|e| ServiceError::Protocol(e.to_string()))?
                .into_iter()
                .map(|r| r as i64)
                .filter(|r| !shrink.contains(r))
                .collect();
            down_changed = self
                .traverser
                .mark_ranks(&mut self.graph, &ranks, ResourceStatus::Down);
        }
        if let Some(expiration) = update.expiration {
            let end = if expiration <= 0.0 {
                NO_EXPIRATION
            } else {
                expiration as Time
            };
            self.graph.graph_duration.end = end;
        }

        if !up_changed.is_empty() || !down_changed.is_empty() || !shrink.is_empty() {
            self.state.cache.dirty_status();
            self.queue_notify(&up_changed, &down_changed, &shrink);
        }
        Ok(())
    }

    fn dom(&self) -> Subsystem {
        self.traverser.policy().dom_subsystem()
    }

    /// `resource.match`: allocate, reserve or probe one job.
    pub fn match_job(
        &mut self,
        cmd: &str,
        jobid: JobId,
        jobspec_text: &str,
        at: Option<Time>,
    ) -> Result<MatchResponse, ServiceError> {
        self.ensure_acquired()?;
        let op = MatchOp::parse(cmd)
            .ok_or_else(|| ServiceError::Invalid(format!("unknown cmd: {cmd}")))?;
        if self.state.is_existent(jobid) {
            return Err(ServiceError::Invalid(format!("job {jobid} already exists")));
        }
        let jobspec = Jobspec::parse(jobspec_text)?;
        let mut writers = create_match_writers(&self.config.match_format)?;

        let t0 = Instant::now();
        let requested_at = at.unwrap_or_else(|| self.now());
        let mut actual_at = requested_at;
        let run = self.traverser.run(
            &mut self.graph,
            &jobspec,
            writers.as_mut(),
            op,
            jobid,
            &mut actual_at,
        );
        let overhead = t0.elapsed().as_secs_f64();
        match run {
            Err(e) => {
                self.perf.tmp_iter_count = 1;
                self.perf.update_match(overhead, jobid, false);
                debug!(jobid, cmd, "match failed: {e}");
                Err(e.into())
            }
            Ok(result) => {
                self.perf.tmp_iter_count = result.iters;
                self.perf.update_match(overhead, jobid, true);
                let state = if op == MatchOp::Satisfiability {
                    JobState::Matched
                } else if !op.commits() {
                    JobState::Matched
                } else if result.reserved {
                    JobState::Reserved
                } else {
                    JobState::Allocated
                };
                let r = result.r.unwrap_or_default();
                if op != MatchOp::Satisfiability {
                    let duration = if jobspec.duration > 0 {
                        jobspec.duration
                    } else {
                        self.graph.graph_duration.span()
                    };
                    // R is recorded only for live allocations/reservations.
                    let stored_r = matches!(state, JobState::Allocated | JobState::Reserved)
                        .then(|| r.clone())
                        .filter(|r| !r.is_empty());
                    self.state.record(JobInfo {
                        jobid,
                        state,
                        scheduled_at: actual_at,
                        duration,
                        jobspec: jobspec_text.to_owned(),
                        r: stored_r,
                        overhead,
                    })?;
                }
                Ok(MatchResponse {
                    jobid,
                    status: state.as_str().to_owned(),
                    overhead,
                    r,
                    at: actual_at,
                })
            }
        }
    }

    /// `resource.match_multi`: one response per job; the caller terminates
    /// the stream with ENODATA after draining these.
    pub fn match_multi(
        &mut self,
        cmd: &str,
        jobs: &[MatchMultiJob],
    ) -> Vec<Result<MatchResponse, ServiceError>> {
        jobs.iter()
            .map(|job| {
                let text = match &job.jobspec {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.match_job(cmd, job.jobid, &text, job.at)
            })
            .collect()
    }

    /// `resource.update`: rehydrate a job from its R set. Idempotent when
    /// the same R arrives again for a known job; a different R for the
    /// same jobid is a conflict.
    pub fn update_job(&mut self, jobid: JobId, r_text: &str) -> Result<MatchResponse, ServiceError> {
        self.ensure_acquired()?;
        if let Some(info) = self.state.job(jobid) {
            let known = info.r.as_deref().unwrap_or("");
            if r_equivalent(known, r_text) {
                return Ok(MatchResponse {
                    jobid,
                    status: info.state.as_str().to_owned(),
                    overhead: info.overhead,
                    r: known.to_owned(),
                    at: info.scheduled_at,
                });
            }
            return Err(ServiceError::Conflict(jobid));
        }

        let t0 = Instant::now();
        let mut reader = self.match_reader()?;
        let mut writers = create_match_writers(&self.config.match_format)?;
        let graph_duration_start = self.graph.graph_duration.start;
        let graph_duration_span = self.graph.graph_duration.span();
        let outcome = self.traverser.update(
            &mut self.graph,
            r_text,
            reader.as_mut(),
            writers.as_mut(),
            jobid,
            graph_duration_start,
            graph_duration_span,
        )?;
        let overhead = t0.elapsed().as_secs_f64();
        self.state.record(JobInfo {
            jobid,
            state: JobState::Allocated,
            scheduled_at: outcome.at,
            duration: outcome.duration,
            jobspec: String::new(),
            r: Some(outcome.r.clone()),
            overhead,
        })?;
        Ok(MatchResponse {
            jobid,
            status: JobState::Allocated.as_str().to_owned(),
            overhead,
            r: outcome.r,
            at: outcome.at,
        })
    }

    /// `resource.cancel`: full removal.
    pub fn cancel(&mut self, jobid: JobId) -> Result<(), ServiceError> {
        self.ensure_acquired()?;
        if !self.state.is_existent(jobid) {
            return Err(ServiceError::NotFound(format!("job {jobid}")));
        }
        self.traverser.remove(&mut self.graph, jobid)?;
        self.state.remove(jobid)?;
        Ok(())
    }

    /// `resource.partial-cancel`: subtract an R subset; reports whether the
    /// job is fully gone. A failure marks the job ERROR but keeps the
    /// jobid reserved so the queue above can retry.
    pub fn partial_cancel(&mut self, jobid: JobId, r_text: &str) -> Result<bool, ServiceError> {
        self.ensure_acquired()?;
        if !self.state.is_existent(jobid) {
            return Err(ServiceError::NotFound(format!("job {jobid}")));
        }
        let mut reader = self.match_reader()?;
        match self
            .traverser
            .partial_cancel(&mut self.graph, r_text, reader.as_mut(), jobid)
        {
            Ok(full) => {
                if full {
                    self.state.remove(jobid)?;
                } else {
                    self.state.cache.dirty_allocations();
                }
                Ok(full)
            }
            Err(e) => {
                warn!(jobid, "partial cancel failed: {e}");
                self.state.mark_error(jobid)?;
                Err(e.into())
            }
        }
    }

    /// `resource.info`.
    pub fn info(&self, jobid: JobId) -> Result<InfoResponse, ServiceError> {
        let info = self
            .state
            .job(jobid)
            .ok_or_else(|| ServiceError::NotFound(format!("job {jobid}")))?;
        Ok(InfoResponse {
            jobid,
            status: info.state.as_str().to_owned(),
            at: info.scheduled_at,
            overhead: info.overhead,
        })
    }

    /// The next free jobid for callers that do not assign their own.
    pub fn reserve_jobid(&self) -> Result<JobId, ServiceError> {
        Ok(self.state.next_jobid()?)
    }

    /// `resource.find`.
    pub fn find(&mut self, criteria: &str, format: Option<&str>) -> Result<String, ServiceError> {
        self.ensure_acquired()?;
        let format = format.unwrap_or(&self.config.match_format);
        let mut writers = create_match_writers(format)?;
        let now = self.now();
        Ok(self
            .traverser
            .find(&self.graph, writers.as_mut(), criteria, now)?)
    }

    fn find_at(&mut self, criteria: &str, now: Time) -> Result<String, ServiceError> {
        let mut writers = create_match_writers("rv1_nosched")?;
        Ok(self
            .traverser
            .find(&self.graph, writers.as_mut(), criteria, now)?)
    }

    /// `resource.status`: cached R sets for the common queries.
    pub fn status_at(&mut self, now: Time) -> Result<StatusResponse, ServiceError> {
        self.ensure_acquired()?;
        if self.state.cache.all().is_none() {
            let r = self.find_at("status=up or status=down", now)?;
            self.state.cache.store_all(r);
        }
        if self.state.cache.down().is_none() {
            let r = self.find_at("status=down", now)?;
            self.state.cache.store_down(r);
        }
        if self.state.cache.allocated().is_none() {
            let r = self.find_at("sched-now=allocated", now)?;
            self.state.cache.store_allocated(r);
        }
        Ok(StatusResponse {
            all: self.state.cache.all().unwrap_or_default().to_owned(),
            down: self.state.cache.down().unwrap_or_default().to_owned(),
            allocated: self.state.cache.allocated().unwrap_or_default().to_owned(),
        })
    }

    pub fn status(&mut self) -> Result<StatusResponse, ServiceError> {
        let now = self.now();
        self.status_at(now)
    }

    /// `resource.set_status`: flip a subtree by path.
    pub fn set_status(&mut self, path: &str, status: &str) -> Result<(), ServiceError> {
        self.ensure_acquired()?;
        let status = ResourceStatus::parse(status)
            .ok_or_else(|| ServiceError::Invalid(format!("unknown status: {status}")))?;
        let ranks = self.traverser.mark(&mut self.graph, path, status)?;
        self.state.cache.dirty_status();
        match status {
            ResourceStatus::Up => self.queue_notify(&ranks, &[], &[]),
            ResourceStatus::Down => self.queue_notify(&[], &ranks, &[]),
        }
        Ok(())
    }

    /// `resource.set_property`: `key` is `name=value` (or bare name).
    pub fn set_property(&mut self, path: &str, key: &str) -> Result<(), ServiceError> {
        self.ensure_acquired()?;
        let dom = self.dom();
        let targets = self.graph.by_path(dom, path).to_vec();
        if targets.is_empty() {
            return Err(ServiceError::NotFound(path.to_owned()));
        }
        let (name, value) = match key.split_once('=') {
            Some((n, v)) => (n.to_owned(), v.to_owned()),
            None => (key.to_owned(), String::new()),
        };
        for v in targets {
            self.graph
                .pool_mut(v)
                .properties
                .insert(name.clone(), value.clone());
        }
        Ok(())
    }

    /// `resource.get_property`.
    pub fn get_property(&self, path: &str, name: &str) -> Result<Vec<String>, ServiceError> {
        self.ensure_acquired()?;
        let dom = self.dom();
        let targets = self.graph.by_path(dom, path);
        if targets.is_empty() {
            return Err(ServiceError::NotFound(path.to_owned()));
        }
        let mut values = Vec::new();
        for &v in targets {
            if let Some(value) = self.graph.pool(v).properties.get(name) {
                values.push(value.clone());
            }
        }
        if values.is_empty() {
            return Err(ServiceError::NotFound(format!("property {name}")));
        }
        Ok(values)
    }

    /// `resource.remove_property`.
    pub fn remove_property(&mut self, path: &str, name: &str) -> Result<(), ServiceError> {
        self.ensure_acquired()?;
        let dom = self.dom();
        let targets = self.graph.by_path(dom, path).to_vec();
        if targets.is_empty() {
            return Err(ServiceError::NotFound(path.to_owned()));
        }
        for v in targets {
            self.graph.pool_mut(v).properties.remove(name);
        }
        Ok(())
    }

    /// `feasibility.check`: satisfiability probe with no state change.
    pub fn feasibility_check(&mut self, jobspec_text: &str) -> Result<(), ServiceError> {
        self.ensure_acquired()?;
        let jobspec = Jobspec::parse(jobspec_text)?;
        let mut writers = create_match_writers(&self.config.match_format)?;
        let mut at = self.graph.graph_duration.start;
        self.traverser
            .run(
                &mut self.graph,
                &jobspec,
                writers.as_mut(),
                MatchOp::Satisfiability,
                0,
                &mut at,
            )
            .map(|_| ())
            .map_err(Into::into)
    }

    /// `resource.stats-get`.
    pub fn stats_get(&self) -> Value {
        let now = wall_now();
        let mut by_rank: HashMap<usize, Vec<u64>> = HashMap::new();
        for (&rank, vertices) in &self.graph.metadata.by_rank {
            if rank >= 0 {
                by_rank.entry(vertices.len()).or_default().push(rank as u64);
            }
        }
        let by_rank: serde_json::Map<String, Value> = by_rank
            .into_iter()
            .map(|(count, ranks)| (idset::encode(ranks), json!(count)))
            .collect();
        let block = |stats: &crate::stats::PerfStats| {
            json!({
                "njobs": stats.njobs,
                "njobs-reset": stats.njobs_reset,
                "max-match-jobid": stats.max_match_jobid,
                "max-match-iters": stats.match_iter_count,
                "stats": {
                    "min": if stats.njobs_reset == 0 { 0.0 } else { stats.min },
                    "max": stats.max,
                    "avg": stats.avg,
                    "variance": stats.variance(),
                }
            })
        };
        json!({
            "V": self.graph.vertex_count(),
            "E": self.graph.edge_count(),
            "by_rank": by_rank,
            "load-time": self.perf.load,
            "graph-uptime": (now - self.perf.graph_loaded_at).max(0),
            "time-since-reset": (now - self.perf.last_reset_at).max(0),
            "match": {
                "succeeded": block(&self.perf.succeeded),
                "failed": block(&self.perf.failed),
            }
        })
    }

    /// `resource.stats-clear`.
    pub fn stats_clear(&mut self) {
        self.perf.reset(wall_now());
    }

    /// `resource.notify` subscribe: registers a route and returns the
    /// initial resource set.
    pub fn notify_subscribe(&mut self) -> Result<(Uuid, Value), ServiceError> {
        self.ensure_acquired()?;
        let route = Uuid::new_v4();
        self.subscribers.insert(route, ());
        let now = self.now();
        let all = self.find_at("status=up or status=down", now)?;
        let resources: Value = serde_json::from_str(&all)
            .map_err(|e| ServiceError::Fatal(format!("emitted R unparsable: {e}")))?;
        Ok((route, json!({ "resources": resources })))
    }

    /// Peer disconnect observed on the streaming RPC.
    pub fn notify_disconnect(&mut self, route: Uuid) {
        self.subscribers.remove(&route);
        self.pending_notify.retain(|(r, _)| *r != route);
    }

    /// Drains queued per-subscriber updates.
    pub fn poll_notifications(&mut self) -> Vec<(Uuid, NotifyUpdate)> {
        std::mem::take(&mut self.pending_notify)
    }

    fn queue_notify(&mut self, up: &[i64], down: &[i64], shrink: &[i64]) {
        if self.subscribers.is_empty() {
            return;
        }
        let update = NotifyUpdate {
            up: idset::encode(up.iter().map(|&r| r as u64)),
            down: idset::encode(down.iter().map(|&r| r as u64)),
            shrink: idset::encode(shrink.iter().map(|&r| r as u64)),
            expiration: self.graph.graph_duration.end,
        };
        for route in self.subscribers.keys().copied().collect::<Vec<_>>() {
            self.pending_notify.push((route, update.clone()));
        }
    }

    /// Wire-level dispatch: one topic string plus JSON payload in, JSON
    /// payload out. Streaming topics are served by their typed methods.
    pub fn dispatch(&mut self, topic: &str, payload: Value) -> Result<Value, ServiceError> {
        let parse = |e: serde_json::Error| ServiceError::Protocol(e.to_string());
        debug!(topic, "request");
        match topic {
            "resource.match" => {
                let req: MatchRequest = serde_json::from_value(payload).map_err(parse)?;
                let resp = self.match_job(&req.cmd, req.jobid, &req.jobspec_text(), req.at)?;
                Ok(serde_json::to_value(resp).map_err(parse)?)
            }
            "resource.update" => {
                let req: UpdateRequest = serde_json::from_value(payload).map_err(parse)?;
                let resp = self.update_job(req.jobid, &req.r_text())?;
                Ok(serde_json::to_value(resp).map_err(parse)?)
            }
            "resource.cancel" => {
                let req: CancelRequest = serde_json::from_value(payload).map_err(parse)?;
                self.cancel(req.jobid)?;
                Ok(json!({}))
            }
            "resource.partial-cancel" => {
                let req: PartialCancelRequest = serde_json::from_value(payload).map_err(parse)?;
                let r = match &req.r {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let full = self.partial_cancel(req.jobid, &r)?;
                Ok(json!({ "full-removal": if full { 1 } else { 0 } }))
            }
            "resource.info" => {
                let req: InfoRequest = serde_json::from_value(payload).map_err(parse)?;
                Ok(serde_json::to_value(self.info(req.jobid)?).map_err(parse)?)
            }
            "resource.stats-get" => Ok(self.stats_get()),
            "resource.stats-clear" => {
                self.stats_clear();
                Ok(json!({}))
            }
            "resource.status" => {
                let resp = self.status()?;
                Ok(serde_json::to_value(resp).map_err(parse)?)
            }
            "resource.find" => {
                let req: FindRequest = serde_json::from_value(payload).map_err(parse)?;
                let r = self.find(&req.criteria, req.format.as_deref())?;
                Ok(json!({ "R": r }))
            }
            "resource.set_property" => {
                let req: PropertyRequest = serde_json::from_value(payload).map_err(parse)?;
                self.set_property(&req.path, &req.key)?;
                Ok(json!({}))
            }
            "resource.get_property" => {
                let req: PropertyRequest = serde_json::from_value(payload).map_err(parse)?;
                let values = self.get_property(&req.path, &req.key)?;
                Ok(json!({ "values": values }))
            }
            "resource.remove_property" => {
                let req: PropertyRequest = serde_json::from_value(payload).map_err(parse)?;
                self.remove_property(&req.path, &req.key)?;
                Ok(json!({}))
            }
            "resource.set_status" => {
                let req: SetStatusRequest = serde_json::from_value(payload).map_err(parse)?;
                self.set_status(&req.path, &req.status)?;
                Ok(json!({}))
            }
            "feasibility.check" => {
                let jobspec = payload
                    .get("jobspec")
                    .ok_or_else(|| ServiceError::Protocol("missing jobspec".to_owned()))?;
                let text = match jobspec {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.feasibility_check(&text)?;
                Ok(json!({}))
            }
            other => Err(ServiceError::Invalid(format!("unknown topic: {other}"))),
        }
    }
}

// Updates are idempotent on the scheduling-relevant body of R: the R_lite
// component decides equivalence.
fn r_equivalent(a: &str, b: &str) -> bool {
    let lite = |text: &str| -> Option<Value> {
        let v: Value = serde_json::from_str(text).ok()?;
        Some(v["execution"]["R_lite"].clone())
    };
    match (lite(a), lite(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}
