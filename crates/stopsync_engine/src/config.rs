//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;
use stopsync_protocol::ConflictPolicy;

/// Names of the cloud objects the engine syncs through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudZone {
    /// Record zone holding the favourites.
    pub zone_name: String,
    /// Subscription that delivers change notifications for the zone.
    pub subscription_id: String,
    /// Record type of a favourite stop.
    pub record_type: String,
}

impl CloudZone {
    /// Creates a zone description.
    pub fn new(
        zone_name: impl Into<String>,
        subscription_id: impl Into<String>,
        record_type: impl Into<String>,
    ) -> Self {
        Self {
            zone_name: zone_name.into(),
            subscription_id: subscription_id.into(),
            record_type: record_type.into(),
        }
    }
}

impl Default for CloudZone {
    fn default() -> Self {
        Self::new("busPanda", "busPandaChanges", "BusStop")
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cloud zone and subscription names.
    pub zone: CloudZone,
    /// Retry configuration for pending operations.
    pub retry: RetryConfig,
    /// Time a background-triggered fetch may take before the host is told
    /// it failed.
    pub background_fetch_budget: Duration,
    /// Push-conflict resolution rounds before a push counts as failed.
    pub max_conflict_rounds: u32,
    /// Journal frames written before the store is compacted.
    pub compact_after_frames: usize,
    /// Policy for reconciling local and remote values.
    pub conflict_policy: ConflictPolicy,
}

impl SyncConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            zone: CloudZone::default(),
            retry: RetryConfig::default(),
            background_fetch_budget: Duration::from_secs(25),
            max_conflict_rounds: 3,
            compact_after_frames: 256,
            conflict_policy: ConflictPolicy::LastWriteWins,
        }
    }

    /// Sets the cloud zone.
    pub fn with_zone(mut self, zone: CloudZone) -> Self {
        self.zone = zone;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the background fetch budget.
    pub fn with_background_fetch_budget(mut self, budget: Duration) -> Self {
        self.background_fetch_budget = budget;
        self
    }

    /// Sets the number of push-conflict rounds.
    pub fn with_max_conflict_rounds(mut self, rounds: u32) -> Self {
        self.max_conflict_rounds = rounds;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compact_after_frames(mut self, frames: usize) -> Self {
        self.compact_after_frames = frames;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Push attempts before an operation is abandoned.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that retries at once, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Delay to wait after `attempt` failed attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% extra.
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.zone.zone_name, "busPanda");
        assert_eq!(config.zone.subscription_id, "busPandaChanges");
        assert_eq!(config.zone.record_type, "BusStop");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.background_fetch_budget, Duration::from_secs(25));
        assert_eq!(config.max_conflict_rounds, 3);
        assert_eq!(config.compact_after_frames, 256);
        assert_eq!(config.conflict_policy, ConflictPolicy::LastWriteWins);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_zone(CloudZone::new("z", "s", "r"))
            .with_retry(RetryConfig::immediate(2))
            .with_background_fetch_budget(Duration::from_millis(50))
            .with_max_conflict_rounds(1)
            .with_compact_after_frames(8)
            .with_conflict_policy(ConflictPolicy::ServerWins);

        assert_eq!(config.zone.zone_name, "z");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.background_fetch_budget, Duration::from_millis(50));
        assert_eq!(config.max_conflict_rounds, 1);
        assert_eq!(config.compact_after_frames, 8);
        assert_eq!(config.conflict_policy, ConflictPolicy::ServerWins);
    }

    #[test]
    fn immediate_has_no_delay() {
        let config = RetryConfig::immediate(3);
        for attempt in 0..10 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay3 = config.delay_for_attempt(3);
        assert!(delay3 >= Duration::from_millis(400));
        assert!(delay3 <= Duration::from_millis(500));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .without_jitter();

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
