//! Router configuration

use std::time::Duration;

use crate::config::ExecutionConfig;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay after the first failed attempt; doubles after each later one
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Returns `None` after the final attempt: there is nothing left to wait for.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        Some(self.backoff_base.saturating_mul(factor))
    }
}

/// Execution loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    pub retry: RetryPolicy,

    /// Step executions allowed per `execute_plan` call
    pub max_steps: usize,

    /// Steps of one ready batch that run together (1 = sequential)
    pub max_concurrent_steps: usize,

    /// max_tokens sent with each step call
    pub step_max_tokens: u32,

    /// Model for steps that carry no `assigned_model`
    pub default_model: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_steps: 100,
            max_concurrent_steps: 1,
            step_max_tokens: 8192,
            default_model: "gemini-3-flash".to_string(),
        }
    }
}

impl RouterConfig {
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

impl From<&ExecutionConfig> for RouterConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                backoff_base: Duration::from_millis(config.backoff_base_ms),
            },
            max_steps: config.max_steps,
            max_concurrent_steps: config.max_concurrent_steps.max(1),
            step_max_tokens: config.step_max_tokens,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_base: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_after(4), None);
    }

    #[test]
    fn test_no_delay_after_last_default_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[test]
    fn test_from_execution_config() {
        let exec = ExecutionConfig {
            max_attempts: 0,
            max_concurrent_steps: 0,
            backoff_base_ms: 250,
            ..ExecutionConfig::default()
        };
        let config = RouterConfig::from(&exec);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.backoff_base, Duration::from_millis(250));
        assert_eq!(config.max_concurrent_steps, 1);
        assert_eq!(config.max_steps, 100);
    }
}
