//! Per-operation running statistics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Running aggregate of every outcome recorded for one operation.
///
/// Duration mean and variance use Welford's incremental update, so memory
/// stays constant no matter how many samples arrive.
#[derive(Debug, Clone, Default)]
pub(crate) struct OperationStats {
    count: u64,
    successes: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    last_recorded_ms: u64,
}

impl OperationStats {
    pub(crate) fn observe(&mut self, duration_ms: f64, success: bool, now_ms: u64) {
        self.count += 1;
        if success {
            self.successes += 1;
        }

        let delta = duration_ms - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (duration_ms - self.mean);

        if self.count == 1 {
            self.min = duration_ms;
            self.max = duration_ms;
        } else {
            self.min = self.min.min(duration_ms);
            self.max = self.max.max(duration_ms);
        }
        self.last_recorded_ms = now_ms;
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    pub(crate) fn snapshot(&self, operation: &str) -> MetricSnapshot {
        let success_rate = if self.count == 0 {
            0.0
        } else {
            self.successes as f64 / self.count as f64
        };
        MetricSnapshot {
            operation: operation.to_string(),
            count: self.count,
            success_count: self.successes,
            failure_count: self.count - self.successes,
            success_rate,
            avg_duration_ms: self.mean,
            std_dev_duration_ms: self.std_dev(),
            min_duration_ms: self.min,
            max_duration_ms: self.max,
            last_recorded_ms: self.last_recorded_ms,
        }
    }
}

/// Fixed-capacity log of recent outcomes, oldest evicted first.
#[derive(Debug, Clone)]
pub(crate) struct OutcomeWindow {
    capacity: usize,
    entries: VecDeque<(u64, bool)>,
}

impl OutcomeWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, at_ms: u64, success: bool) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((at_ms, success));
    }

    /// Returns `(total, failures)` for outcomes at or after `since_ms`.
    pub(crate) fn counts_since(&self, since_ms: u64) -> (usize, usize) {
        self.entries
            .iter()
            .rev()
            .take_while(|(at, _)| *at >= since_ms)
            .fold((0, 0), |(total, failures), (_, success)| {
                (total + 1, failures + usize::from(!success))
            })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Point-in-time view of an operation's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Operation name.
    pub operation: String,
    /// Total recorded outcomes.
    pub count: u64,
    /// Successful outcomes.
    pub success_count: u64,
    /// Failed outcomes.
    pub failure_count: u64,
    /// Lifetime success ratio in `[0, 1]`.
    pub success_rate: f64,
    /// Running mean duration.
    pub avg_duration_ms: f64,
    /// Sample standard deviation of durations.
    pub std_dev_duration_ms: f64,
    /// Fastest recorded duration.
    pub min_duration_ms: f64,
    /// Slowest recorded duration.
    pub max_duration_ms: f64,
    /// Clock reading of the latest sample.
    pub last_recorded_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_direct_computation() {
        let samples = [10.0, 20.0, 30.0, 40.0];
        let mut stats = OperationStats::default();
        for (i, s) in samples.iter().enumerate() {
            stats.observe(*s, i % 2 == 0, i as u64);
        }

        let snap = stats.snapshot("op");
        assert_eq!(snap.count, 4);
        assert!((snap.avg_duration_ms - 25.0).abs() < 1e-9);
        // sample variance of 10,20,30,40 is 166.67
        assert!((snap.std_dev_duration_ms - 166.666_666_f64.sqrt()).abs() < 1e-3);
        assert!((snap.min_duration_ms - 10.0).abs() < f64::EPSILON);
        assert!((snap.max_duration_ms - 40.0).abs() < f64::EPSILON);
        assert!((snap.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snap.failure_count, 2);
        assert_eq!(snap.last_recorded_ms, 3);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = OutcomeWindow::new(3);
        window.push(1, false);
        window.push(2, true);
        window.push(3, true);
        window.push(4, true);

        assert_eq!(window.len(), 3);
        assert_eq!(window.counts_since(0), (3, 0));
    }

    #[test]
    fn test_window_counts_since() {
        let mut window = OutcomeWindow::new(10);
        window.push(100, false);
        window.push(200, true);
        window.push(300, false);

        assert_eq!(window.counts_since(150), (2, 1));
        assert_eq!(window.counts_since(301), (0, 0));
    }
}
