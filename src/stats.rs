//! Online match-performance statistics.
//!
//! Two [`PerfStats`] blocks (succeeded, failed) track match wall time with
//! Welford's online mean/variance, alongside graph load time and uptime.

use crate::{JobId, Time};

/// Running statistics over match wall times, updated once per attempt.
#[derive(Debug, Clone)]
pub struct PerfStats {
    /// Total match count since graph load.
    pub njobs: u64,
    /// Match count since the last stats reset.
    pub njobs_reset: u64,
    /// Jobid of the slowest match observed.
    pub max_match_jobid: JobId,
    /// Scheduling-loop iterations of the slowest match.
    pub match_iter_count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Welford running sum of squared deviations.
    pub m2: f64,
}

impl Default for PerfStats {
    fn default() -> Self {
        Self {
            njobs: 0,
            njobs_reset: 0,
            max_match_jobid: 0,
            match_iter_count: 0,
            min: f64::MAX,
            max: 0.0,
            avg: 0.0,
            m2: 0.0,
        }
    }
}

impl PerfStats {
    /// Folds one match attempt into the running statistics.
    pub fn update(&mut self, elapsed: f64, jobid: JobId, match_iters: u64) {
        self.njobs += 1;
        self.njobs_reset += 1;
        if elapsed < self.min {
            self.min = elapsed;
        }
        if elapsed > self.max {
            self.max = elapsed;
            self.max_match_jobid = jobid;
            self.match_iter_count = match_iters;
        }
        let delta = elapsed - self.avg;
        self.avg += delta / self.njobs_reset as f64;
        let delta2 = elapsed - self.avg;
        self.m2 += delta * delta2;
    }

    /// Population variance of the samples since the last reset.
    pub fn variance(&self) -> f64 {
        if self.njobs_reset == 0 {
            0.0
        } else {
            self.m2 / self.njobs_reset as f64
        }
    }

    /// Clears everything except the lifetime `njobs` counter.
    pub fn reset(&mut self) {
        let njobs = self.njobs;
        *self = Self::default();
        self.njobs = njobs;
    }
}

/// All performance data the stats surface reports.
#[derive(Debug, Clone)]
pub struct MatchPerf {
    /// Graph load wall time in seconds.
    pub load: f64,
    /// Epoch second the graph finished loading.
    pub graph_loaded_at: Time,
    /// Epoch second stats were last cleared.
    pub last_reset_at: Time,
    pub succeeded: PerfStats,
    pub failed: PerfStats,
    /// Iteration count of the most recent scheduling loop, folded into
    /// whichever block the attempt lands in.
    pub tmp_iter_count: u64,
}

impl Default for MatchPerf {
    fn default() -> Self {
        Self {
            load: 0.0,
            graph_loaded_at: 0,
            last_reset_at: 0,
            succeeded: PerfStats::default(),
            failed: PerfStats::default(),
            tmp_iter_count: 0,
        }
    }
}

impl MatchPerf {
    pub fn update_match(&mut self, elapsed: f64, jobid: JobId, succeeded: bool) {
        let iters = self.tmp_iter_count;
        if succeeded {
            self.succeeded.update(elapsed, jobid, iters);
        } else {
            self.failed.update(elapsed, jobid, iters);
        }
    }

    pub fn reset(&mut self, now: Time) {
        self.succeeded.reset();
        self.failed.reset();
        self.last_reset_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_mean_and_variance() {
        let mut stats = PerfStats::default();
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        for (i, s) in samples.iter().enumerate() {
            stats.update(*s, i as JobId, 1);
        }
        assert_eq!(stats.njobs, 8);
        assert!((stats.avg - 5.0).abs() < 1e-12);
        // Known population variance of this sample set.
        assert!((stats.variance() - 4.0).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.max_match_jobid, 7);
    }

    #[test]
    fn reset_keeps_lifetime_count() {
        let mut stats = PerfStats::default();
        stats.update(1.0, 1, 1);
        stats.update(3.0, 2, 1);
        stats.reset();
        assert_eq!(stats.njobs, 2);
        assert_eq!(stats.njobs_reset, 0);
        assert_eq!(stats.avg, 0.0);
        stats.update(10.0, 3, 4);
        assert_eq!(stats.njobs, 3);
        assert!((stats.avg - 10.0).abs() < 1e-12);
    }

    #[test]
    fn slowest_match_tracks_iterations() {
        let mut perf = MatchPerf::default();
        perf.tmp_iter_count = 3;
        perf.update_match(0.5, 10, true);
        perf.tmp_iter_count = 9;
        perf.update_match(1.5, 11, true);
        assert_eq!(perf.succeeded.max_match_jobid, 11);
        assert_eq!(perf.succeeded.match_iter_count, 9);
        assert_eq!(perf.failed.njobs, 0);
    }
}
