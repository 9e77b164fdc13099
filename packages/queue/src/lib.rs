//! Attune job & task queue.
//!
//! Coordinates the generation of multi-document reading packages: each job
//! fans out into independently claimable tasks (one per document per stage),
//! executed by short-lived workers pulling from a shared durable store with
//! at-least-once semantics.
//!
//! The moving parts, leaves first:
//!
//! - [`sequence`]: the codec between task sequence numbers and
//!   (stage, document index) pairs. Every other module decodes through it.
//! - [`manifest`]: declared task layouts and parameter validation per job
//!   type.
//! - [`models`]: durable job/task/artifact records and the computed
//!   document view.
//! - [`store`]: the [`QueueStore`](store::QueueStore) trait with in-memory
//!   and PostgreSQL backends; the atomic conditional claim lives here.
//! - [`dependency`]: the text-before-everything-else gate.
//! - [`service`]: [`JobQueue`](service::JobQueue), the high-level API.
//! - [`assembler`]: merges artifacts into per-document views at read time.
//! - [`recovery`]: restart recovery and the stall watchdog.
//! - [`backend`]: the opaque generation engine seam.

pub mod assembler;
pub mod backend;
pub mod dependency;
pub mod error;
pub mod manifest;
pub mod models;
pub mod recovery;
pub mod sequence;
pub mod service;
pub mod store;

pub use backend::{GeneratedArtifact, GenerationBackend, GenerationRequest};
pub use error::{QueueError, QueueResult};
pub use models::{
    Artifact, ArtifactRef, Document, Job, JobProgress, JobStatus, JobType, Task, TaskStatus,
};
pub use recovery::{RecoveryMode, RecoveryReport, RecoverySupervisor};
pub use sequence::{SequenceError, Stage};
pub use service::JobQueue;
pub use store::{MemoryQueueStore, PostgresQueueStore, QueueStore, RecoveryFilter};
