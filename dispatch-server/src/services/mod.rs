//! Supporting services

pub mod notifier;

pub use notifier::{BroadcastNotifier, NotificationEmitter};
