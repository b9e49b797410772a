//! Configuration for bulk mutation calls.

use crate::error::{ClientError, ClientResult};
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;
use widecol_protocol::StatusCode;

/// Configuration for writes against one table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Fully qualified table name.
    pub table_name: String,
    /// Application profile used for request routing.
    pub app_profile_id: Option<String>,
    /// Retry configuration for the bulk retry loop.
    pub retry: RetryConfig,
    /// Status codes treated as transient for per-entry results.
    pub retryable_codes: BTreeSet<StatusCode>,
}

impl TableConfig {
    /// Creates a configuration with default retry settings.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            app_profile_id: None,
            retry: RetryConfig::default(),
            retryable_codes: BTreeSet::from([StatusCode::Unavailable]),
        }
    }

    /// Sets the application profile.
    pub fn with_app_profile(mut self, app_profile_id: impl Into<String>) -> Self {
        self.app_profile_id = Some(app_profile_id.into());
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the set of retryable status codes.
    pub fn with_retryable_codes(mut self, codes: impl IntoIterator<Item = StatusCode>) -> Self {
        self.retryable_codes = codes.into_iter().collect();
        self
    }

    /// Checks the configuration for values that would make every call fail.
    pub fn validate(&self) -> ClientResult<()> {
        if self.table_name.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "table name must not be empty".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ClientError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ClientError::InvalidConfig(format!(
                "backoff_multiplier must be finite and at least 1.0, got {multiplier}"
            )));
        }
        if self.retryable_codes.contains(&StatusCode::Ok) {
            return Err(ClientError::InvalidConfig(
                "OK cannot be a retryable code".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
    /// Stop starting new attempts once this much time has passed.
    pub max_elapsed: Option<Duration>,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
            max_elapsed: None,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            max_elapsed: None,
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

    /// Sets the overall time budget.
    pub fn with_max_elapsed(mut self, limit: Duration) -> Self {
        self.max_elapsed = Some(limit);
        self
    }

    /// Returns true if another attempt may start after `attempts` attempts
    /// taking `elapsed` in total.
    pub fn allows_attempt(&self, attempts: u32, elapsed: Duration) -> bool {
        attempts < self.max_attempts && self.max_elapsed.map_or(true, |limit| elapsed < limit)
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        let total = if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% on top of the capped delay
            delay_secs + delay_secs * rand::thread_rng().gen_range(0.0..=0.25)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(total).unwrap_or(self.max_delay)
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
    fn table_config_builder() {
        let config = TableConfig::new("projects/p/instances/i/tables/t")
            .with_app_profile("batch")
            .with_retry(RetryConfig::no_retry())
            .with_retryable_codes([StatusCode::Unavailable, StatusCode::Aborted]);

        assert_eq!(config.table_name, "projects/p/instances/i/tables/t");
        assert_eq!(config.app_profile_id.as_deref(), Some("batch"));
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.retryable_codes.contains(&StatusCode::Aborted));
        config.validate().unwrap();
    }

    #[test]
    fn table_config_validation() {
        assert!(TableConfig::new("  ").validate().is_err());
        assert!(TableConfig::new("t")
            .with_retry(RetryConfig::new(0))
            .validate()
            .is_err());
        assert!(TableConfig::new("t")
            .with_retryable_codes([StatusCode::Ok])
            .validate()
            .is_err());
    }

    #[test]
    fn bad_backoff_multiplier_rejected() {
        for multiplier in [-1.0, 0.5, f64::NAN, f64::INFINITY] {
            let config = TableConfig::new("t")
                .with_retry(RetryConfig::new(3).with_backoff_multiplier(multiplier));
            assert!(matches!(
                config.validate(),
                Err(ClientError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn delay_never_panics_on_unvalidated_config() {
        let negative = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(1))
            .with_backoff_multiplier(-1.0)
            .without_jitter();
        assert_eq!(negative.delay_for_attempt(2), Duration::ZERO);

        let huge = RetryConfig::new(5)
            .with_initial_delay(Duration::MAX)
            .with_max_delay(Duration::MAX);
        assert_eq!(huge.delay_for_attempt(3), Duration::MAX);

        let nan = RetryConfig::new(5)
            .with_backoff_multiplier(f64::NAN)
            .without_jitter();
        assert_eq!(nan.delay_for_attempt(2), nan.max_delay);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(126));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .without_jitter();

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn attempt_budget() {
        let config = RetryConfig::new(2).with_max_elapsed(Duration::from_secs(1));
        assert!(config.allows_attempt(0, Duration::ZERO));
        assert!(config.allows_attempt(1, Duration::from_millis(999)));
        assert!(!config.allows_attempt(1, Duration::from_secs(1)));
        assert!(!config.allows_attempt(2, Duration::ZERO));
    }
}
