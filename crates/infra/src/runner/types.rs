//! Runner policies and counters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy after critical batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay
    Fixed,
    /// Exponential backoff: base * 2^(n-1)
    #[default]
    Exponential,
}

/// How long the runner pauses after consecutive critical batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first critical batch
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0). The offset is derived from `n`, so it is the
    /// same on every worker; the result never exceeds `max_delay`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay after the `n`-th consecutive critical batch (1-indexed).
    pub fn delay_for(&self, n: u32) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(n.saturating_sub(1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        // Deterministic jitter derived from n
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((n as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms) as u64)
    }
}

/// Result of one lease → dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub leased: usize,
    pub compiled: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Jobs returned to the queue unprocessed after a critical failure or a
    /// failed queue call.
    pub released: usize,
    /// Jobs whose lease was taken over before they were reached.
    pub lost: usize,
    pub critical: bool,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.compiled + self.skipped + self.failed
    }
}

/// Runner counters since start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub batches: u64,
    pub jobs_processed: u64,
    pub jobs_compiled: u64,
    pub jobs_skipped: u64,
    pub jobs_failed: u64,
    pub jobs_critical: u64,
    pub jobs_released: u64,
    pub jobs_lost: u64,
    pub queue_errors: u64,
}

impl RunnerStats {
    pub(crate) fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.jobs_processed += report.processed() as u64;
        self.jobs_compiled += report.compiled as u64;
        self.jobs_skipped += report.skipped as u64;
        self.jobs_failed += report.failed as u64;
        self.jobs_critical += u64::from(report.critical);
        self.jobs_released += report.released as u64;
        self.jobs_lost += report.lost as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(5))
        };

        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(7), Duration::from_millis(500));
    }

    #[test]
    fn jitter_never_exceeds_the_cap() {
        let max = Duration::from_secs(5);
        let policy = BackoffPolicy::exponential(Duration::from_secs(1), max);

        for n in 1..20 {
            assert!(policy.delay_for(n) <= max, "n={n}");
        }
    }

    #[test]
    fn jitter_stays_within_range() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(1000), Duration::from_secs(60));

        for n in 1..6 {
            let nominal = 1000.0 * 2_f64.powi(n as i32 - 1);
            let actual = policy.delay_for(n).as_millis() as f64;
            assert!((actual - nominal).abs() <= nominal * 0.1 + 1.0, "n={n}");
        }
    }

    #[test]
    fn stats_accumulate_batches() {
        let mut stats = RunnerStats::default();
        stats.record(&BatchReport {
            leased: 3,
            compiled: 1,
            skipped: 0,
            failed: 1,
            released: 1,
            lost: 0,
            critical: true,
        });
        stats.record(&BatchReport {
            leased: 1,
            compiled: 0,
            skipped: 1,
            lost: 1,
            ..BatchReport::default()
        });

        assert_eq!(stats.batches, 2);
        assert_eq!(stats.jobs_processed, 3);
        assert_eq!(stats.jobs_critical, 1);
        assert_eq!(stats.jobs_released, 1);
        assert_eq!(stats.jobs_lost, 1);
    }
}
