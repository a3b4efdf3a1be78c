//! Sales-channel adapters
//!
//! One adapter per upstream platform, all behind [`ChannelAdapter`]. The
//! adapter's job ends at producing canonical [`OrderDraft`]s and mapped
//! statuses; dedup, persistence, and the status state machine belong to the
//! sync engine. Adapters are registered in a closed [`AdapterRegistry`] built
//! at startup, never discovered at runtime.

mod manual;
mod mercadolibre;
mod shopify;
mod woocommerce;

pub use manual::ManualAdapter;
pub use mercadolibre::MercadoLibreAdapter;
pub use shopify::ShopifyAdapter;
pub use woocommerce::WooCommerceAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Channel, ChannelType};
use shared::order::{OrderDraft, OrderStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Time window for a pull sync
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncWindow {
    /// Pull orders updated after this instant (channel high-water mark)
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// One page of raw upstream orders
#[derive(Debug, Default)]
pub struct FetchPage {
    pub raw_orders: Vec<serde_json::Value>,
    /// Opaque token for the next page; `None` means this was the last page
    pub next_page: Option<String>,
}

/// Adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Credentials rejected; retrying cannot help until they are fixed
    #[error("channel authentication failed: {0}")]
    Auth(String),

    /// Upstream unreachable or returned a server error; transient
    #[error("upstream error: {0}")]
    Upstream(String),

    /// One raw order that cannot be mapped to a draft
    #[error("malformed upstream order: {0}")]
    Malformed(String),

    /// Channel record is missing something the adapter needs
    #[error("channel misconfigured: {0}")]
    Misconfigured(String),
}

impl AdapterError {
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Misconfigured(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Self::Auth(err.to_string())
            }
            _ => Self::Upstream(err.to_string()),
        }
    }
}

/// One upstream platform integration
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Fetch one page of orders inside the window
    async fn fetch_orders(
        &self,
        channel: &Channel,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> Result<FetchPage, AdapterError>;

    /// Map one raw upstream order to a canonical draft (pure)
    fn to_draft(&self, channel: &Channel, raw: &serde_json::Value)
        -> Result<OrderDraft, AdapterError>;

    /// Map the upstream status fields to a canonical status (pure)
    fn map_status(&self, raw: &serde_json::Value) -> OrderStatus;

    /// Register an order-update webhook with the upstream platform
    ///
    /// Best-effort: callers log failures and continue, channel creation is
    /// never blocked on it.
    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<(), AdapterError>;
}

/// Closed lookup table of adapters, built once at startup
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Arc<HashMap<ChannelType, Arc<dyn ChannelAdapter>>>,
}

impl AdapterRegistry {
    /// Registry with all supported platforms over a shared HTTP client
    pub fn with_defaults() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut adapters: HashMap<ChannelType, Arc<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(
            ChannelType::Shopify,
            Arc::new(ShopifyAdapter::new(client.clone())),
        );
        adapters.insert(
            ChannelType::Woocommerce,
            Arc::new(WooCommerceAdapter::new(client.clone())),
        );
        adapters.insert(
            ChannelType::Mercadolibre,
            Arc::new(MercadoLibreAdapter::new(client)),
        );
        adapters.insert(ChannelType::Manual, Arc::new(ManualAdapter::new()));

        Self {
            adapters: Arc::new(adapters),
        }
    }

    /// Registry holding a single adapter (for testing)
    #[cfg(test)]
    pub fn with_adapter(channel_type: ChannelType, adapter: Arc<dyn ChannelAdapter>) -> Self {
        let mut adapters: HashMap<ChannelType, Arc<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(channel_type, adapter);
        Self {
            adapters: Arc::new(adapters),
        }
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel_type).cloned()
    }
}

// ========== Raw JSON helpers shared by adapters ==========

pub(crate) fn str_field(raw: &serde_json::Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Upstream money fields arrive as numbers or decimal strings
pub(crate) fn money_field(raw: &serde_json::Value, key: &str) -> Option<f64> {
    match raw.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn date_field(raw: &serde_json::Value, key: &str) -> Option<DateTime<Utc>> {
    raw.get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_covers_all_channel_types() {
        let registry = AdapterRegistry::with_defaults();
        for ct in [
            ChannelType::Shopify,
            ChannelType::Woocommerce,
            ChannelType::Mercadolibre,
            ChannelType::Manual,
        ] {
            let adapter = registry.get(ct).expect("adapter missing");
            assert_eq!(adapter.channel_type(), ct);
        }
    }

    #[test]
    fn test_money_field_accepts_both_shapes() {
        let raw = json!({"total": "19.90", "shipping": 4.5, "junk": true});
        assert_eq!(money_field(&raw, "total"), Some(19.90));
        assert_eq!(money_field(&raw, "shipping"), Some(4.5));
        assert_eq!(money_field(&raw, "junk"), None);
        assert_eq!(money_field(&raw, "missing"), None);
    }

    #[test]
    fn test_date_field_parses_rfc3339() {
        let raw = json!({"created_at": "2024-05-01T10:00:00-03:00"});
        let dt = date_field(&raw, "created_at").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-01T13:00:00+00:00");
    }
}
