//! Queue behavior configuration shared by the API and worker services.

use crate::{get_env_or_default, parse_env, ConfigError, ConfigResult};

/// Timing and retry knobs for the task queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Seconds a worker sleeps between empty claim attempts.
    pub poll_interval_secs: u64,

    /// Seconds between lease heartbeats while a task executes.
    pub heartbeat_interval_secs: u64,

    /// Seconds of heartbeat silence before a claimed task counts as
    /// stalled. Must comfortably exceed the slowest legitimate single
    /// generation call, and must exceed the heartbeat interval.
    pub stall_timeout_secs: u64,

    /// Per-task execution attempts before permanent failure.
    pub max_attempts: i32,

    /// Tasks one worker process runs concurrently.
    pub max_concurrent_tasks: usize,

    /// Startup recovery mode: "retry" (default) or "error".
    pub recovery_mode: String,
}

impl QueueConfig {
    /// Load queue configuration from environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            poll_interval_secs: parse_env("QUEUE_POLL_INTERVAL", 5)?,
            heartbeat_interval_secs: parse_env("QUEUE_HEARTBEAT_INTERVAL", 15)?,
            stall_timeout_secs: parse_env("QUEUE_STALL_TIMEOUT", 600)?,
            max_attempts: parse_env("QUEUE_MAX_ATTEMPTS", 3)?,
            max_concurrent_tasks: parse_env("QUEUE_MAX_CONCURRENT_TASKS", 4)?,
            recovery_mode: get_env_or_default("QUEUE_RECOVERY_MODE", "retry"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.stall_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::ValidationError(format!(
                "QUEUE_STALL_TIMEOUT ({}) must exceed QUEUE_HEARTBEAT_INTERVAL ({})",
                self.stall_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        if self.max_attempts < 1 {
            return Err(ConfigError::ValidationError(
                "QUEUE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            heartbeat_interval_secs: 15,
            stall_timeout_secs: 600,
            max_attempts: 3,
            max_concurrent_tasks: 4,
            recovery_mode: "retry".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.recovery_mode, "retry");
    }

    #[test]
    fn test_stall_timeout_must_exceed_heartbeat() {
        let config = QueueConfig {
            heartbeat_interval_secs: 60,
            stall_timeout_secs: 60,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_attempts_must_be_positive() {
        let config = QueueConfig {
            max_attempts: 0,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
