//! Manual-entry channel
//!
//! Phone and walk-in orders typed in by an operator. There is no upstream to
//! pull from or register webhooks with; orders arrive pushed as drafts
//! through the sync engine's manual-ingest path, and go through exactly the
//! same dedup and state-machine pipeline as synced ones.

use super::{date_field, money_field, str_field, AdapterError, ChannelAdapter, FetchPage, SyncWindow};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared::models::{Channel, ChannelType};
use shared::order::{OrderDraft, OrderStatus};

/// Prefix for locally generated external order ids
const MANUAL_ID_PREFIX: &str = "MAN-";

pub struct ManualAdapter;

impl ManualAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ManualAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for ManualAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Manual
    }

    async fn fetch_orders(
        &self,
        _channel: &Channel,
        _window: &SyncWindow,
        _page_token: Option<&str>,
    ) -> Result<FetchPage, AdapterError> {
        // Manual orders are pushed, never pulled
        Ok(FetchPage::default())
    }

    fn to_draft(&self, channel: &Channel, raw: &Value) -> Result<OrderDraft, AdapterError> {
        // Operator UIs may omit the external id; mint one so the natural key
        // stays total
        let external_order_id = str_field(raw, "external_order_id")
            .unwrap_or_else(|| format!("{MANUAL_ID_PREFIX}{}", shared::util::new_id()));

        Ok(OrderDraft {
            channel_id: channel.id.clone(),
            external_order_id,
            customer_name: str_field(raw, "customer_name")
                .ok_or_else(|| AdapterError::Malformed("manual order without customer name".into()))?,
            customer_phone: str_field(raw, "customer_phone"),
            customer_email: str_field(raw, "customer_email"),
            address_street: str_field(raw, "address_street")
                .ok_or_else(|| AdapterError::Malformed("manual order without address".into()))?,
            address_city: str_field(raw, "address_city"),
            address_postal_code: str_field(raw, "address_postal_code"),
            address_notes: str_field(raw, "address_notes"),
            total_amount: money_field(raw, "total_amount").unwrap_or(0.0),
            shipping_cost: money_field(raw, "shipping_cost").unwrap_or(0.0),
            status: self.map_status(raw),
            order_date: date_field(raw, "order_date").unwrap_or_else(Utc::now),
            delivered_at: None,
        })
    }

    fn map_status(&self, raw: &Value) -> OrderStatus {
        raw.get("status")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(OrderStatus::Pending)
    }

    async fn register_webhook(
        &self,
        _channel: &Channel,
        _callback_url: &str,
    ) -> Result<(), AdapterError> {
        Ok(())
    }
}
