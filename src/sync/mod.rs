//! Tracking synchronization pipeline.
//!
//! ```text
//! orders -> submitter (per-carrier tasks) -> poller (backoff) -> reconciler -> store
//! ```
//!
//! [`SyncEngine`] is the entry point; [`SyncScheduler`] drives it daily.

pub mod engine;
pub mod poller;
pub mod reconciler;
pub mod scheduler;
pub mod submitter;
pub mod task;

pub use engine::{SyncEngine, SyncFailure, SyncSummary};
pub use poller::{BackoffPolicy, TaskPoller};
pub use reconciler::{MergeOutcome, Reconciler, RecordMatch};
pub use scheduler::{duration_until_next_midnight, SchedulerStatus, SharedSchedulerStatus, SyncScheduler};
pub use submitter::{plan_batches, BatchPlan, SubBatch, TaskSubmitter};
pub use task::{SyncTask, SyncTaskState};
