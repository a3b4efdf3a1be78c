//! MercadoLibre adapter
//!
//! Pulls from `/orders/search` with offset pagination and a Bearer access
//! token. The seller id lives in the channel's `store_url` field as a plain
//! id (the platform has no per-store URL).
//!
//! # Status mapping
//!
//! Shipping state wins when present, order state is the fallback:
//!
//! | Upstream | Canonical |
//! |----------|-----------|
//! | `shipping.status = "ready_to_ship"` | `READY_FOR_PICKUP` |
//! | `shipping.status = "shipped"` | `OUT_FOR_DELIVERY` |
//! | `shipping.status = "delivered"` | `DELIVERED` |
//! | `shipping.status = "not_delivered"` | `FAILED_DELIVERY` |
//! | order `status = "paid"` | `PROCESSING` |
//! | order `status = "cancelled"` | `CANCELLED` |
//! | anything else | `PENDING` |

use super::{
    date_field, money_field, str_field, AdapterError, ChannelAdapter, FetchPage, SyncWindow,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use shared::models::{Channel, ChannelType};
use shared::order::{OrderDraft, OrderStatus};
use tracing::debug;

const API_BASE: &str = "https://api.mercadolibre.com";
const PAGE_SIZE: u32 = 50;

pub struct MercadoLibreAdapter {
    client: reqwest::Client,
}

impl MercadoLibreAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn access_token(channel: &Channel) -> Result<&str, AdapterError> {
        channel
            .credentials
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::Misconfigured("missing MercadoLibre access token".into()))
    }

    fn seller_id(channel: &Channel) -> Result<&str, AdapterError> {
        channel
            .store_url
            .as_deref()
            .ok_or_else(|| AdapterError::Misconfigured("missing MercadoLibre seller id".into()))
    }
}

#[async_trait]
impl ChannelAdapter for MercadoLibreAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Mercadolibre
    }

    async fn fetch_orders(
        &self,
        channel: &Channel,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> Result<FetchPage, AdapterError> {
        let offset: u32 = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| AdapterError::Malformed(format!("bad page token: {token}")))?,
            None => 0,
        };

        let mut query: Vec<(String, String)> = vec![
            ("seller".into(), Self::seller_id(channel)?.to_string()),
            ("sort".into(), "date_asc".into()),
            ("limit".into(), PAGE_SIZE.to_string()),
            ("offset".into(), offset.to_string()),
        ];
        if let Some(since) = window.since {
            query.push(("order.date_last_updated.from".into(), since.to_rfc3339()));
        }
        if let Some(until) = window.until {
            query.push(("order.date_last_updated.to".into(), until.to_rfc3339()));
        }

        let response = self
            .client
            .get(format!("{API_BASE}/orders/search"))
            .bearer_auth(Self::access_token(channel)?)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AdapterError::Auth(format!(
                "MercadoLibre returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AdapterError::Upstream(format!(
                "MercadoLibre returned {status}"
            )));
        }

        let body: Value = response.json().await?;
        let raw_orders = body
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let total = body
            .pointer("/paging/total")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let next_offset = offset + raw_orders.len() as u32;
        let next_page = (next_offset < total && !raw_orders.is_empty())
            .then(|| next_offset.to_string());

        debug!(channel_id = %channel.id, offset, count = raw_orders.len(), total, "Fetched MercadoLibre page");
        Ok(FetchPage {
            raw_orders,
            next_page,
        })
    }

    fn to_draft(&self, channel: &Channel, raw: &Value) -> Result<OrderDraft, AdapterError> {
        let external_order_id = raw
            .get("id")
            .and_then(|v| v.as_u64())
            .map(|id| id.to_string())
            .ok_or_else(|| AdapterError::Malformed("order without id".into()))?;

        let empty = json!({});
        let buyer = raw.get("buyer").unwrap_or(&empty);
        let shipping = raw.get("shipping").unwrap_or(&empty);
        let address = shipping.get("receiver_address").unwrap_or(&empty);

        let customer_name = match (
            str_field(buyer, "first_name"),
            str_field(buyer, "last_name"),
        ) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => str_field(buyer, "nickname")
                .ok_or_else(|| AdapterError::Malformed("order without buyer".into()))?,
        };

        let status = self.map_status(raw);
        let delivered_at = if status == OrderStatus::Delivered {
            date_field(shipping, "date_delivered").or_else(|| date_field(raw, "last_updated"))
        } else {
            None
        };

        Ok(OrderDraft {
            channel_id: channel.id.clone(),
            external_order_id,
            customer_name,
            customer_phone: buyer
                .pointer("/phone/number")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            customer_email: str_field(buyer, "email"),
            address_street: str_field(address, "address_line")
                .ok_or_else(|| AdapterError::Malformed("order without receiver address".into()))?,
            address_city: address
                .pointer("/city/name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            address_postal_code: str_field(address, "zip_code"),
            address_notes: str_field(address, "comment"),
            total_amount: money_field(raw, "total_amount").unwrap_or(0.0),
            shipping_cost: money_field(shipping, "cost").unwrap_or(0.0),
            status,
            order_date: date_field(raw, "date_created").unwrap_or_else(Utc::now),
            delivered_at,
        })
    }

    fn map_status(&self, raw: &Value) -> OrderStatus {
        if let Some(shipping_status) = raw
            .pointer("/shipping/status")
            .and_then(|v| v.as_str())
        {
            match shipping_status {
                "ready_to_ship" => return OrderStatus::ReadyForPickup,
                "shipped" => return OrderStatus::OutForDelivery,
                "delivered" => return OrderStatus::Delivered,
                "not_delivered" => return OrderStatus::FailedDelivery,
                "cancelled" => return OrderStatus::Cancelled,
                _ => {}
            }
        }
        match str_field(raw, "status").as_deref() {
            Some("paid") => OrderStatus::Processing,
            Some("cancelled") => OrderStatus::Cancelled,
            _ => OrderStatus::Pending,
        }
    }

    async fn register_webhook(
        &self,
        channel: &Channel,
        _callback_url: &str,
    ) -> Result<(), AdapterError> {
        // MercadoLibre notifications are configured per application in the
        // developer console, not per seller over the API. Validate the token
        // so a dead channel still fails fast here.
        let response = self
            .client
            .get(format!("{API_BASE}/users/me"))
            .bearer_auth(Self::access_token(channel)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdapterError::Auth(format!(
                "token check returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
