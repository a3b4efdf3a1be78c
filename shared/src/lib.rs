//! Shared types for the delivery platform
//!
//! Common types used by the dispatch server and any outer HTTP layer:
//! the canonical order model and status machine, channel and sync-log
//! models, delivery-provider types, domain notifications, and the
//! structured error module.

pub mod error;
pub mod message;
pub mod models;
pub mod order;
pub mod util;

// Re-exports
pub use error::{AppError, AppResult, ErrorCode};
pub use order::{Order, OrderDraft, OrderStatus, TransitionSource};
