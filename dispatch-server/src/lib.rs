//! Order lifecycle and multi-source synchronization engine
//!
//! Ingests orders from sales channels (Shopify, WooCommerce, MercadoLibre,
//! manual entry), holds them in a canonical embedded store, dispatches them
//! to a last-mile delivery provider, and reconciles provider webhooks back
//! into the canonical state.
//!
//! # Module layout
//!
//! ```text
//! dispatch-server/src/
//! ├── core/       # Configuration and server state
//! ├── channels/   # Per-platform channel adapters
//! ├── sync/       # Channel sync engine and scheduler
//! ├── store/      # Canonical order store (redb)
//! ├── dispatch/   # Delivery provider gateway
//! ├── reconcile/  # Provider webhook reconciler
//! └── services/   # Notification emitter
//! ```

pub mod channels;
pub mod core;
pub mod dispatch;
pub mod logger;
pub mod reconcile;
pub mod services;
pub mod store;
pub mod sync;

pub use crate::core::{Config, ServerState};
pub use channels::{AdapterRegistry, ChannelAdapter};
pub use dispatch::DispatchGateway;
pub use logger::{init_logger, init_logger_with_file};
pub use reconcile::WebhookReconciler;
pub use store::OrderStore;
pub use sync::ChannelSyncEngine;

/// Load `.env` and initialize logging
///
/// Must run before anything logs. Reads `LOG_LEVEL` and `LOG_DIR` directly
/// from the environment since the full config is not parsed yet.
pub fn setup_environment() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    let level = std::env::var("LOG_LEVEL").ok();
    let dir = std::env::var("LOG_DIR").ok().map(std::path::PathBuf::from);
    logger::init_logger_with_file(level.as_deref(), dir.as_deref());
    Ok(())
}
