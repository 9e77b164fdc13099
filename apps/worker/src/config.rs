//! Worker configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use attune_queue::recovery::RecoveryMode;
use attune_queue::Stage;
use attune_shared_config::CommonConfig;
use uuid::Uuid;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Stable identifier this process stamps on its leases
    pub worker_id: String,

    /// Stages this worker claims, in polling order
    pub stages: Vec<Stage>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

        let worker_id = env::var("WORKER_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));

        let stages = parse_stages(
            &env::var("WORKER_STAGES").unwrap_or_else(|_| "text,render,audio,song".to_string()),
        )?;

        Ok(Self {
            common,
            worker_id,
            stages,
        })
    }

    // Convenience accessors for queue timing fields

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.common.queue.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.common.queue.heartbeat_interval_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.common.queue.stall_timeout_secs)
    }

    pub fn max_attempts(&self) -> i32 {
        self.common.queue.max_attempts
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.common.queue.max_concurrent_tasks
    }

    pub fn recovery_mode(&self) -> Result<RecoveryMode> {
        self.common
            .queue
            .recovery_mode
            .parse()
            .context("Invalid QUEUE_RECOVERY_MODE value")
    }
}

/// Parse a comma-separated stage list, preserving order and dropping
/// duplicates.
fn parse_stages(raw: &str) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let stage: Stage = part
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid WORKER_STAGES entry: {}", e))?;
        if !stages.contains(&stage) {
            stages.push(stage);
        }
    }
    if stages.is_empty() {
        anyhow::bail!("WORKER_STAGES must name at least one stage");
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_stages() {
        let stages = parse_stages("text,render,audio,song").unwrap();
        assert_eq!(
            stages,
            vec![Stage::Text, Stage::Render, Stage::Audio, Stage::Song]
        );
    }

    #[test]
    fn test_parse_subset_preserves_order() {
        let stages = parse_stages("audio, text").unwrap();
        assert_eq!(stages, vec![Stage::Audio, Stage::Text]);
    }

    #[test]
    fn test_parse_drops_duplicates() {
        let stages = parse_stages("text,text,song").unwrap();
        assert_eq!(stages, vec![Stage::Text, Stage::Song]);
    }

    #[test]
    fn test_parse_rejects_unknown_stage() {
        assert!(parse_stages("text,video").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_list() {
        assert!(parse_stages(" , ").is_err());
    }
}
