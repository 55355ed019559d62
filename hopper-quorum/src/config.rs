//! Configuration for election rounds and retries.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff between failed rounds.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay after the first failed round.
    pub initial: Duration,
    /// Upper bound before jitter.
    pub max: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            max: Duration::from_millis(5000),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retries` (0-based), with 50% to 150% jitter.
    ///
    /// A multiplier that yields a negative or non-finite delay falls back
    /// to `max`.
    #[must_use]
    pub fn duration(&self, retries: u32, rng: &mut impl Rng) -> Duration {
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());
        let jitter_factor = rng.random_range(0.5..1.5);
        Duration::try_from_secs_f64(capped * jitter_factor).unwrap_or(self.max)
    }
}

/// Timeouts and retry policy for the coordinator.
#[derive(Clone, Debug)]
pub struct ElectionConfig {
    /// Upper bound on a single peer call.
    pub rpc_timeout: Duration,

    /// Deadline for one phase of a round to reach a quorum.
    pub round_timeout: Duration,

    /// Rounds started before giving up with `RetriesExhausted`.
    pub max_attempts: u32,

    /// Delay between rounds that timed out.
    pub backoff: BackoffConfig,

    /// Upper bound of the random pause before retrying a preempted round.
    ///
    /// Keeps two proposers from preempting each other in lockstep.
    pub preempt_stagger: Duration,

    /// Emit a liveness warning every this many consecutive timeouts.
    pub timeout_warning_threshold: u32,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(2000),
            round_timeout: Duration::from_millis(5000),
            max_attempts: 10,
            backoff: BackoffConfig::default(),
            preempt_stagger: Duration::from_millis(100),
            timeout_warning_threshold: 3,
        }
    }
}

impl ElectionConfig {
    /// Configuration for replicas on a low-latency local network.
    pub fn local_network() -> Self {
        Self {
            rpc_timeout: Duration::from_millis(200),
            round_timeout: Duration::from_millis(500),
            max_attempts: 10,
            backoff: BackoffConfig {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(200),
                multiplier: 2.0,
            },
            preempt_stagger: Duration::from_millis(10),
            timeout_warning_threshold: 3,
        }
    }

    /// Configuration for replicas spread across a WAN.
    pub fn wan_network() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(5),
            round_timeout: Duration::from_secs(15),
            max_attempts: 20,
            backoff: BackoffConfig {
                initial: Duration::from_secs(2),
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            preempt_stagger: Duration::from_millis(500),
            timeout_warning_threshold: 3,
        }
    }

    /// Override the retry cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Override the per-call and per-phase timeouts.
    pub fn with_timeouts(mut self, rpc_timeout: Duration, round_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self.round_timeout = round_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_defaults() {
        let config = ElectionConfig::default();
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.round_timeout, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.timeout_warning_threshold, 3);
        assert_eq!(config.backoff.initial, Duration::from_secs(1));
        assert_eq!(config.backoff.max, Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_grows_and_caps_within_jitter() {
        let backoff = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        for retries in 0..20 {
            let expected = (1.0f64 * 2f64.powi(retries as i32)).min(5.0);
            let delay = backoff.duration(retries, &mut rng).as_secs_f64();
            assert!(delay >= expected * 0.5 - 1e-9, "retry {retries}: {delay}");
            assert!(delay <= expected * 1.5 + 1e-9, "retry {retries}: {delay}");
        }
    }

    #[test]
    fn test_backoff_huge_retry_count_is_capped() {
        let backoff = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let delay = backoff.duration(u32::MAX, &mut rng);
        assert!(delay <= Duration::from_millis(7500));
    }

    #[test]
    fn test_backoff_never_panics_on_odd_settings() {
        let mut rng = StdRng::seed_from_u64(3);

        let negative = BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            multiplier: -2.0,
        };
        assert_eq!(negative.duration(1, &mut rng), Duration::from_secs(5));

        let not_a_number = BackoffConfig {
            multiplier: f64::NAN,
            ..BackoffConfig::default()
        };
        let delay = not_a_number.duration(2, &mut rng);
        assert!(delay <= Duration::from_millis(7500));

        let unbounded = BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::MAX,
            multiplier: 2.0,
        };
        for _ in 0..10 {
            let delay = unbounded.duration(2000, &mut rng);
            assert!(delay >= Duration::from_secs(u64::MAX / 4));
        }
    }

    #[test]
    fn test_builders() {
        let config = ElectionConfig::local_network()
            .with_max_attempts(3)
            .with_timeouts(Duration::from_millis(5), Duration::from_millis(10));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.rpc_timeout, Duration::from_millis(5));
        assert_eq!(config.round_timeout, Duration::from_millis(10));
    }
}
