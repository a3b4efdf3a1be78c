//! Sales channel configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported channel kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Shopify,
    Woocommerce,
    Mercadolibre,
    Manual,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shopify => "shopify",
            Self::Woocommerce => "woocommerce",
            Self::Mercadolibre => "mercadolibre",
            Self::Manual => "manual",
        }
    }

    /// Manual channels have no upstream to pull from
    pub fn supports_pull(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials for an upstream channel API
///
/// Stored opaque; each adapter knows which fields it needs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelCredentials {
    /// API key / access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Secret (WooCommerce consumer secret, Shopify shared secret)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    /// OAuth refresh token (MercadoLibre)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// A configured sales channel belonging to a merchant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub merchant_id: String,
    pub channel_type: ChannelType,
    /// Display name, e.g. "Main Shopify store"
    pub name: String,
    /// Base URL of the upstream store/API (unused for manual channels)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
    #[serde(default)]
    pub credentials: ChannelCredentials,
    /// Disabled channels are skipped by the sync scheduler
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// High-water mark: upstream updated_at of the newest order ever pulled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_wire_format() {
        let json = serde_json::to_string(&ChannelType::Mercadolibre).unwrap();
        assert_eq!(json, "\"mercadolibre\"");
    }

    #[test]
    fn test_manual_does_not_pull() {
        assert!(!ChannelType::Manual.supports_pull());
        assert!(ChannelType::Shopify.supports_pull());
    }
}
