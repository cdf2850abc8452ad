//! Job broker machinery: model, state store, tier queues, broker, worker
//! loop, reaper, and wire events.

pub mod broker;
pub mod events;
pub mod job;
pub mod queue;
pub mod reaper;
pub mod store;
pub mod worker;

pub use broker::{Broker, SharedBroker, SubmitRequest};
pub use events::RenderEvent;
pub use job::{
    AssetRef, JobStatus, QueueTier, RenderErrorKind, RenderJob, RenderOutput, Stage, StageError,
};
pub use queue::{Lease, QueueCounts, TierQueueConfig, TierQueues};
pub use reaper::{ReaperConfig, StaleJobReaper};
pub use store::{InMemoryJobStore, JobStore};
pub use worker::{ExecutionContext, RenderExecutor, RenderWorker, WorkerConfig};
