//! Persistent domain models shared across components

mod channel;
mod delivery;
mod sync_log;

pub use channel::{Channel, ChannelCredentials, ChannelType};
pub use delivery::{Depot, DispatchRequest, JobSnapshot, JobState};
pub use sync_log::{SyncLog, SyncOutcome};
