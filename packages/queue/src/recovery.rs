//! Recovery supervisor: restart recovery and the stall watchdog.
//!
//! Two triggers feed the same bounded-retry policy. On startup, every
//! claimed/processing task and every processing job is treated as orphaned
//! work left behind by a crash. While running, a watchdog reclaims tasks
//! whose heartbeat has gone silent past the stall threshold: the threshold
//! must exceed the slowest legitimate single generation call, or healthy
//! long calls get reclaimed as false positives.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::models::{JobStatus, TaskStatus};
use crate::service::JobQueue;
use crate::store::RecoveryFilter;

/// Fixed message recorded on tasks orphaned by a restart.
pub const ORPHANED_TASK_MESSAGE: &str = "interrupted by a service restart";

/// Fixed message recorded on jobs that exhausted their budget via restarts.
pub const ORPHANED_JOB_MESSAGE: &str =
    "interrupted by a service restart and out of retry budget";

/// Fixed message recorded on tasks reclaimed for heartbeat silence.
pub const STALLED_TASK_MESSAGE: &str = "heartbeat went silent past the stall threshold";

/// What to do with orphaned work found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Re-queue orphans that still have retry budget (the default).
    #[default]
    Retry,
    /// Fail every orphan outright, no retry.
    Error,
}

impl std::str::FromStr for RecoveryMode {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "error" => Ok(Self::Error),
            other => Err(QueueError::Configuration(format!(
                "unknown recovery mode: {other}"
            ))),
        }
    }
}

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks reset back to pending.
    pub requeued: Vec<Uuid>,
    /// Tasks (or jobs) pushed to permanent failure.
    pub failed: Vec<Uuid>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Detects orphaned and stalled work and re-queues or fails it under the
/// bounded-retry policy.
pub struct RecoverySupervisor {
    queue: JobQueue,
    mode: RecoveryMode,
    stall_timeout: Duration,
}

impl RecoverySupervisor {
    pub fn new(queue: JobQueue, mode: RecoveryMode, stall_timeout: Duration) -> Self {
        Self {
            queue,
            mode,
            stall_timeout,
        }
    }

    /// Watchdog period: a fraction of the stall timeout, at least a second.
    pub fn watchdog_period(&self) -> Duration {
        (self.stall_timeout / 4).max(Duration::from_secs(1))
    }

    /// Startup pass over all orphaned work. In `Retry` mode, attempts are
    /// incremented and work under budget goes back to pending/queued; over
    /// budget it fails with a fixed message. In `Error` mode every orphan
    /// fails immediately.
    #[tracing::instrument(skip(self))]
    pub async fn recover_on_startup(&self) -> QueueResult<RecoveryReport> {
        let budget = match self.mode {
            RecoveryMode::Retry => self.queue.max_attempts(),
            RecoveryMode::Error => 0,
        };

        let recovered = self
            .queue
            .store()
            .recover_tasks(RecoveryFilter::default(), budget, ORPHANED_TASK_MESSAGE)
            .await?;

        let mut report = RecoveryReport::default();
        let mut touched_jobs: BTreeSet<Uuid> = BTreeSet::new();
        for task in &recovered {
            touched_jobs.insert(task.job_id);
            match task.status {
                TaskStatus::Pending => report.requeued.push(task.id),
                _ => report.failed.push(task.id),
            }
            tracing::warn!(
                task_id = %task.id,
                job_id = %task.job_id,
                status = %task.status,
                attempts = task.attempts,
                "orphaned task recovered"
            );
        }

        // Processing jobs are orphans too: their coordinator died with them.
        for job in self
            .queue
            .store()
            .list_jobs_by_status(JobStatus::Processing)
            .await?
        {
            touched_jobs.insert(job.id);
            let attempts = self
                .queue
                .store()
                .bump_job_attempts(job.id)
                .await?
                .unwrap_or(i32::MAX);

            if self.mode == RecoveryMode::Error || attempts >= self.queue.max_attempts() {
                let tasks = self.queue.store().list_tasks(job.id).await?;
                let progress = crate::models::JobProgress::from_counts(
                    tasks.len() as u32,
                    tasks
                        .iter()
                        .filter(|t| t.status == TaskStatus::Complete)
                        .count() as u32,
                    tasks
                        .iter()
                        .filter(|t| t.status == TaskStatus::Failed)
                        .count() as u32,
                );
                self.queue
                    .store()
                    .update_job_state(
                        job.id,
                        JobStatus::Error,
                        &progress,
                        Some(ORPHANED_JOB_MESSAGE),
                    )
                    .await?;
                report.failed.push(job.id);
                tracing::error!(job_id = %job.id, attempts, "orphaned job failed");
                touched_jobs.remove(&job.id);
            }
        }

        for job_id in touched_jobs {
            self.queue
                .recompute_with_note(job_id, Some(ORPHANED_TASK_MESSAGE))
                .await?;
        }

        if report.is_empty() {
            tracing::info!("startup recovery found no orphaned work");
        } else {
            tracing::info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "startup recovery finished"
            );
        }
        Ok(report)
    }

    /// One watchdog tick: reclaim every task whose heartbeat is older than
    /// the stall threshold. The conditional update in the store makes this
    /// exactly-once per tick even when sweeps race.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_stalled(&self) -> QueueResult<RecoveryReport> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.stall_timeout)
                .map_err(|e| QueueError::Configuration(format!("stall timeout: {e}")))?;

        let recovered = self
            .queue
            .store()
            .recover_tasks(
                RecoveryFilter {
                    job_id: None,
                    stalled_before: Some(cutoff),
                },
                self.queue.max_attempts(),
                STALLED_TASK_MESSAGE,
            )
            .await?;

        let mut report = RecoveryReport::default();
        let mut touched_jobs: BTreeSet<Uuid> = BTreeSet::new();
        for task in &recovered {
            touched_jobs.insert(task.job_id);
            match task.status {
                TaskStatus::Pending => report.requeued.push(task.id),
                _ => report.failed.push(task.id),
            }
            tracing::warn!(
                task_id = %task.id,
                job_id = %task.job_id,
                status = %task.status,
                attempts = task.attempts,
                "stalled task reclaimed"
            );
        }

        for job_id in touched_jobs {
            self.queue
                .recompute_with_note(job_id, Some(STALLED_TASK_MESSAGE))
                .await?;
        }

        Ok(report)
    }

    /// Run the stall watchdog until `shutdown` fires.
    pub async fn run_watchdog(&self, shutdown: CancellationToken) {
        let period = self.watchdog_period();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(period_secs = period.as_secs_f64(), "stall watchdog running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("stall watchdog stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_stalled().await {
                        tracing::error!(error = %e, "stall sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_mode_parsing() {
        assert_eq!("retry".parse::<RecoveryMode>().unwrap(), RecoveryMode::Retry);
        assert_eq!("ERROR".parse::<RecoveryMode>().unwrap(), RecoveryMode::Error);
        assert!("panic".parse::<RecoveryMode>().is_err());
    }

    #[test]
    fn test_watchdog_period_is_fraction_of_timeout() {
        let queue = JobQueue::new(
            std::sync::Arc::new(crate::store::MemoryQueueStore::new()),
            3,
        );
        let supervisor =
            RecoverySupervisor::new(queue, RecoveryMode::Retry, Duration::from_secs(60));
        assert_eq!(supervisor.watchdog_period(), Duration::from_secs(15));

        let queue = JobQueue::new(
            std::sync::Arc::new(crate::store::MemoryQueueStore::new()),
            3,
        );
        let supervisor =
            RecoverySupervisor::new(queue, RecoveryMode::Retry, Duration::from_secs(2));
        assert_eq!(supervisor.watchdog_period(), Duration::from_secs(1));
    }
}
