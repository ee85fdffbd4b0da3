//! Time-axis reservation tracking for a single resource pool.
//!
//! A [`Planner`] answers "what quantity is free over `[t, t+d)`?" and
//! enumerates scheduleable start times for a requested quantity. It backs
//! every vertex of the resource graph: the pool's own allocation timeline,
//! its exclusivity checker, and (through [`MultiPlanner`]) the subtree
//! aggregates used for pruning.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

use crate::Time;

pub mod errors;
pub mod multi;

#[cfg(test)]
mod tests;

pub use errors::PlannerError;
pub use multi::MultiPlanner;

/// One reservation held by a holder id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Time,
    /// Exclusive end.
    pub end: Time,
    pub qty: u64,
    /// Insertion sequence, for stable earliest-inserted ordering.
    seq: u64,
}

impl Span {
    pub fn duration(&self) -> u64 {
        (self.end - self.start) as u64
    }
}

/// Piecewise-constant reservation timeline over one resource kind.
///
/// # Internal structure
///
/// - `profile`: `BTreeMap` from event timestamp to the total quantity in use
///   from that instant until the next event. The window base is always
///   present, so the occupancy at any instant is the value of the greatest
///   key not above it.
/// - `spans`: holder id to its reservation, at most one per holder.
///
/// # Complexity
///
/// Insertion, removal and availability queries are logarithmic in the number
/// of active reservations (plus the number of events inside the probed
/// window).
#[derive(Debug, Clone)]
pub struct Planner {
    base: Time,
    window: u64,
    capacity: u64,
    kind: String,
    profile: BTreeMap<Time, u64>,
    spans: HashMap<u64, Span>,
    next_seq: u64,
}

impl Planner {
    /// Creates an empty timeline covering `[base_time, base_time+duration)`.
    pub fn new(base_time: Time, duration: u64, capacity: u64, kind: &str) -> Self {
        let mut profile = BTreeMap::new();
        profile.insert(base_time, 0);
        Self {
            base: base_time,
            window: duration,
            capacity,
            kind: kind.to_owned(),
            profile,
            spans: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn base_time(&self) -> Time {
        self.base
    }

    pub fn duration(&self) -> u64 {
        self.window
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn resource_kind(&self) -> &str {
        &self.kind
    }

    /// Exclusive end of the planner window.
    pub fn window_end(&self) -> Time {
        self.base.saturating_add_unsigned(self.window)
    }

    pub fn span_of(&self, holder: u64) -> Option<&Span> {
        self.spans.get(&holder)
    }

    /// Holders in earliest-inserted order.
    pub fn holders(&self) -> Vec<u64> {
        let mut ids: Vec<(u64, u64)> = self.spans.iter().map(|(&h, s)| (s.seq, h)).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, h)| h).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    fn check_window(&self, at: Time, duration: u64) -> Result<Time, PlannerError> {
        let err = PlannerError::InvalidWindow {
            at,
            duration,
            base: self.base,
            window: self.window,
        };
        if duration == 0 || at < self.base {
            return Err(err);
        }
        let end = at.checked_add_unsigned(duration).ok_or(err.clone())?;
        if end > self.window_end() {
            return Err(err);
        }
        Ok(end)
    }

    /// Quantity in use at instant `t`.
    pub fn occupancy_at(&self, t: Time) -> u64 {
        self.profile
            .range(..=t)
            .next_back()
            .map(|(_, &q)| q)
            .unwrap_or(0)
    }

    // Peak occupancy over [at, end).
    fn peak_occupancy(&self, at: Time, end: Time) -> u64 {
        let mut peak = self.occupancy_at(at);
        for (_, &q) in self.profile.range((Excluded(at), Excluded(end))) {
            if q > peak {
                peak = q;
            }
        }
        peak
    }

    /// Minimum free quantity across `[at, at+duration)`.
    pub fn avail_resources_during(&self, at: Time, duration: u64) -> Result<u64, PlannerError> {
        let end = self.check_window(at, duration)?;
        Ok(self.capacity - self.peak_occupancy(at, end))
    }

    /// Records a reservation of `qty` over `[at, at+duration)` for `holder`.
    ///
    /// # Errors
    ///
    /// - [`PlannerError::InvalidWindow`] when the span falls outside the
    ///   planner window or has zero duration.
    /// - [`PlannerError::ExceedsCapacity`] when `qty` exceeds the free
    ///   quantity anywhere inside the span.
    /// - [`PlannerError::DuplicateHolder`] when the holder already owns a
    ///   live span here.
    pub fn add_span(
        &mut self,
        at: Time,
        duration: u64,
        qty: u64,
        holder: u64,
    ) -> Result<(), PlannerError> {
        let end = self.check_window(at, duration)?;
        if self.spans.contains_key(&holder) {
            return Err(PlannerError::DuplicateHolder(holder));
        }
        let available = self.capacity - self.peak_occupancy(at, end);
        if qty > available {
            return Err(PlannerError::ExceedsCapacity {
                requested: qty,
                available,
            });
        }
        self.split_at(at);
        self.split_at(end);
        for (_, q) in self.profile.range_mut(at..end) {
            *q += qty;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.spans.insert(
            holder,
            Span {
                start: at,
                end,
                qty,
                seq,
            },
        );
        Ok(())
    }

    /// Removes the holder's span. Idempotent; removing an absent holder is a
    /// successful no-op.
    pub fn remove_span(&mut self, holder: u64) {
        if let Some(span) = self.spans.remove(&holder) {
            self.subtract(span.start, span.end, span.qty);
        }
    }

    /// Shrinks the holder's span by `qty`, removing it entirely when the
    /// remaining quantity reaches zero. Returns true when the span was fully
    /// removed (including when the holder was already absent).
    pub fn reduce_span(&mut self, holder: u64, qty: u64) -> bool {
        let Some(span) = self.spans.get_mut(&holder) else {
            return true;
        };
        if qty >= span.qty {
            self.remove_span(holder);
            return true;
        }
        span.qty -= qty;
        let (start, end) = (span.start, span.end);
        self.subtract(start, end, qty);
        false
    }

    fn subtract(&mut self, start: Time, end: Time, qty: u64) {
        for (_, q) in self.profile.range_mut(start..end) {
            *q = q.saturating_sub(qty);
        }
        self.coalesce(start, end);
    }

    // Keeps the event map minimal: drop keys whose value equals their
    // predecessor's. The window base key always stays.
    fn coalesce(&mut self, start: Time, end: Time) {
        let keys: Vec<Time> = self
            .profile
            .range(start..=end)
            .map(|(&t, _)| t)
            .filter(|&t| t != self.base)
            .collect();
        for t in keys {
            let value = self.profile[&t];
            let prev = self
                .profile
                .range(..t)
                .next_back()
                .map(|(_, &q)| q)
                .unwrap_or(0);
            if value == prev {
                self.profile.remove(&t);
            }
        }
    }

    // Ensures an event key exists at t, copying the occupancy in effect.
    fn split_at(&mut self, t: Time) {
        if t >= self.window_end() {
            return;
        }
        if !self.profile.contains_key(&t) {
            let q = self.occupancy_at(t);
            self.profile.insert(t, q);
        }
    }

    /// Ascending iterator over start points `t' >= at` where `qty` fits for
    /// `duration`. Candidate points are the requested time and subsequent
    /// occupancy-change events.
    ///
    /// # Errors
    ///
    /// [`PlannerError::ExceedsTotal`] when `qty` can never fit.
    pub fn avail_times(
        &self,
        at: Time,
        duration: u64,
        qty: u64,
    ) -> Result<AvailTimes<'_>, PlannerError> {
        if qty > self.capacity {
            return Err(PlannerError::ExceedsTotal {
                requested: qty,
                capacity: self.capacity,
            });
        }
        Ok(AvailTimes {
            planner: self,
            duration,
            qty,
            cursor: Some(at.max(self.base)),
        })
    }
}

/// Iterator over scheduleable start times, soonest first. See
/// [`Planner::avail_times`].
#[derive(Debug)]
pub struct AvailTimes<'a> {
    planner: &'a Planner,
    duration: u64,
    qty: u64,
    cursor: Option<Time>,
}

impl Iterator for AvailTimes<'_> {
    type Item = Time;

    fn next(&mut self) -> Option<Time> {
        let mut candidate = self.cursor.take()?;
        loop {
            if candidate.checked_add_unsigned(self.duration)? > self.planner.window_end() {
                return None;
            }
            let fits = self
                .planner
                .avail_resources_during(candidate, self.duration)
                .map(|free| free >= self.qty)
                .unwrap_or(false);
            let next_event = self
                .planner
                .profile
                .range((Excluded(candidate), Unbounded))
                .next()
                .map(|(&t, _)| t);
            if fits {
                self.cursor = next_event;
                return Some(candidate);
            }
            candidate = next_event?;
        }
    }
}
