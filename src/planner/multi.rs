//! N-dimensional planner: one timeline per tracked resource kind, sharing a
//! window, so a multi-kind feasibility probe at a vertex is one traversal.

use std::collections::BTreeSet;

use crate::interner::ResourceType;
use crate::Time;

use super::{Planner, PlannerError};

#[derive(Debug, Clone)]
struct Dim {
    rtype: ResourceType,
    planner: Planner,
}

/// A vector of [`Planner`]s under a shared event window.
///
/// Used as the subtree-aggregate pruning filter: each dimension tracks the
/// aggregate quantity of one pruning type beneath a vertex, and a request is
/// rejected without descending when any dimension cannot satisfy it.
#[derive(Debug, Clone)]
pub struct MultiPlanner {
    base: Time,
    window: u64,
    dims: Vec<Dim>,
}

impl MultiPlanner {
    /// Creates one planner per `(kind, capacity)` pair over the shared
    /// window `[base_time, base_time+duration)`.
    pub fn new(base_time: Time, duration: u64, capacities: &[(ResourceType, u64)]) -> Self {
        let dims = capacities
            .iter()
            .map(|(rtype, cap)| Dim {
                rtype: *rtype,
                planner: Planner::new(base_time, duration, *cap, rtype.as_str()),
            })
            .collect();
        Self {
            base: base_time,
            window: duration,
            dims,
        }
    }

    pub fn base_time(&self) -> Time {
        self.base
    }

    pub fn duration(&self) -> u64 {
        self.window
    }

    pub fn window_end(&self) -> Time {
        self.base.saturating_add_unsigned(self.window)
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Tracked kinds in dimension order.
    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.dims.iter().map(|d| d.rtype).collect()
    }

    pub fn tracks(&self, rtype: ResourceType) -> bool {
        self.dims.iter().any(|d| d.rtype == rtype)
    }

    pub fn capacity_of(&self, rtype: ResourceType) -> Option<u64> {
        self.dim(rtype).map(|d| d.planner.capacity())
    }

    fn dim(&self, rtype: ResourceType) -> Option<&Dim> {
        self.dims.iter().find(|d| d.rtype == rtype)
    }

    fn dim_mut(&mut self, rtype: ResourceType) -> Option<&mut Dim> {
        self.dims.iter_mut().find(|d| d.rtype == rtype)
    }

    /// Adds a dimension, or grows the capacity of an existing one (graph
    /// growth re-primes filters through this).
    pub fn add_capacity(&mut self, rtype: ResourceType, capacity: u64) {
        match self.dim_mut(rtype) {
            Some(dim) => {
                let planner = &mut dim.planner;
                *planner = resized(planner, planner.capacity() + capacity);
            }
            None => self.dims.push(Dim {
                rtype,
                planner: Planner::new(self.base, self.window, capacity, rtype.as_str()),
            }),
        }
    }

    /// Minimum free quantity of one kind across `[at, at+duration)`.
    pub fn avail_of(
        &self,
        rtype: ResourceType,
        at: Time,
        duration: u64,
    ) -> Result<u64, PlannerError> {
        let dim = self
            .dim(rtype)
            .ok_or_else(|| PlannerError::UnknownDimension(rtype.as_str().to_owned()))?;
        dim.planner.avail_resources_during(at, duration)
    }

    /// Per-dimension minimum free quantities across the window.
    pub fn avail_during(
        &self,
        at: Time,
        duration: u64,
    ) -> Result<Vec<(ResourceType, u64)>, PlannerError> {
        self.dims
            .iter()
            .map(|d| {
                d.planner
                    .avail_resources_during(at, duration)
                    .map(|q| (d.rtype, q))
            })
            .collect()
    }

    /// Reserves per-kind quantities for `holder` atomically: every named
    /// dimension is checked before any is mutated. Kinds with no dimension
    /// here are ignored (a vertex only tracks the kinds present beneath it).
    pub fn add_span(
        &mut self,
        at: Time,
        duration: u64,
        counts: &[(ResourceType, u64)],
        holder: u64,
    ) -> Result<(), PlannerError> {
        for (rtype, qty) in counts {
            if *qty == 0 {
                continue;
            }
            if let Some(dim) = self.dim(*rtype) {
                let available = dim.planner.avail_resources_during(at, duration)?;
                if *qty > available {
                    return Err(PlannerError::ExceedsCapacity {
                        requested: *qty,
                        available,
                    });
                }
                if dim.planner.span_of(holder).is_some() {
                    return Err(PlannerError::DuplicateHolder(holder));
                }
            }
        }
        for (rtype, qty) in counts {
            if *qty == 0 {
                continue;
            }
            if let Some(dim) = self.dim_mut(*rtype) {
                dim.planner.add_span(at, duration, *qty, holder)?;
            }
        }
        Ok(())
    }

    /// Removes the holder's spans in every dimension. Idempotent.
    pub fn remove_span(&mut self, holder: u64) {
        for dim in &mut self.dims {
            dim.planner.remove_span(holder);
        }
    }

    /// Shrinks the holder's spans by per-kind quantities. Returns true when
    /// no dimension holds the holder anymore.
    pub fn reduce_span(&mut self, holder: u64, counts: &[(ResourceType, u64)]) -> bool {
        for (rtype, qty) in counts {
            if let Some(dim) = self.dim_mut(*rtype) {
                dim.planner.reduce_span(holder, *qty);
            }
        }
        !self.holds(holder)
    }

    pub fn holds(&self, holder: u64) -> bool {
        self.dims.iter().any(|d| d.planner.span_of(holder).is_some())
    }

    /// Holders present in any dimension, earliest-inserted first.
    pub fn holders(&self) -> Vec<u64> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for dim in &self.dims {
            for h in dim.planner.holders() {
                if seen.insert(h) {
                    out.push(h);
                }
            }
        }
        out
    }

    /// Ascending iterator over start points where every requested kind is
    /// simultaneously satisfied for `duration`.
    ///
    /// # Errors
    ///
    /// [`PlannerError::ExceedsTotal`] when any requested quantity can never
    /// fit; [`PlannerError::UnknownDimension`] when a kind is untracked.
    pub fn avail_times(
        &self,
        at: Time,
        duration: u64,
        request: &[(ResourceType, u64)],
    ) -> Result<MultiAvailTimes<'_>, PlannerError> {
        let mut needs = Vec::with_capacity(request.len());
        for (rtype, qty) in request {
            if *qty == 0 {
                continue;
            }
            let dim = self
                .dim(*rtype)
                .ok_or_else(|| PlannerError::UnknownDimension(rtype.as_str().to_owned()))?;
            if *qty > dim.planner.capacity() {
                return Err(PlannerError::ExceedsTotal {
                    requested: *qty,
                    capacity: dim.planner.capacity(),
                });
            }
            needs.push((*rtype, *qty));
        }
        // Candidate points are the union of every dimension's event times.
        let mut events: BTreeSet<Time> = BTreeSet::new();
        events.insert(at.max(self.base));
        for (rtype, _) in &needs {
            if let Some(dim) = self.dim(*rtype) {
                events.extend(
                    dim.planner
                        .spans_event_times()
                        .into_iter()
                        .filter(|&t| t > at),
                );
            }
        }
        Ok(MultiAvailTimes {
            multi: self,
            duration,
            needs,
            candidates: events.into_iter().collect(),
            pos: 0,
        })
    }
}

// Rebuilds a planner with a new capacity, replaying existing spans. Only
// used for capacity growth, where every replay fits by construction.
fn resized(planner: &Planner, capacity: u64) -> Planner {
    let mut next = Planner::new(
        planner.base_time(),
        planner.duration(),
        capacity,
        planner.resource_kind(),
    );
    for holder in planner.holders() {
        if let Some(span) = planner.span_of(holder) {
            // Spans that fit the old capacity fit the larger one.
            let _ = next.add_span(span.start, span.duration(), span.qty, holder);
        }
    }
    next
}

impl Planner {
    // Event timestamps visible to multi-dimension candidate enumeration.
    pub(crate) fn spans_event_times(&self) -> Vec<Time> {
        let mut times = Vec::new();
        for holder in self.holders() {
            if let Some(span) = self.span_of(holder) {
                times.push(span.start);
                times.push(span.end);
            }
        }
        times
    }
}

/// Iterator over simultaneously-satisfying start times. See
/// [`MultiPlanner::avail_times`].
#[derive(Debug)]
pub struct MultiAvailTimes<'a> {
    multi: &'a MultiPlanner,
    duration: u64,
    needs: Vec<(ResourceType, u64)>,
    candidates: Vec<Time>,
    pos: usize,
}

impl Iterator for MultiAvailTimes<'_> {
    type Item = Time;

    fn next(&mut self) -> Option<Time> {
        while self.pos < self.candidates.len() {
            let t = self.candidates[self.pos];
            self.pos += 1;
            if t.checked_add_unsigned(self.duration)? > self.multi.window_end() {
                return None;
            }
            let all_fit = self.needs.iter().all(|(rtype, qty)| {
                self.multi
                    .avail_of(*rtype, t, self.duration)
                    .map(|free| free >= *qty)
                    .unwrap_or(false)
            });
            if all_fit {
                return Some(t);
            }
        }
        None
    }
}
