//! Channel synchronization: the pull engine and its background scheduler

pub mod engine;
pub mod scheduler;

pub use engine::{ChannelSyncEngine, IngestOutcome, SyncError, SyncReport};
pub use scheduler::SyncScheduler;
