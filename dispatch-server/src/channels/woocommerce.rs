//! WooCommerce adapter
//!
//! Pulls from the REST API v3 (`/wp-json/wc/v3/orders`) with page-number
//! pagination and consumer key/secret query auth.
//!
//! # Status mapping
//!
//! | WooCommerce | Canonical |
//! |-------------|-----------|
//! | `pending`, `on-hold` | `PENDING` |
//! | `processing` | `PROCESSING` |
//! | `completed` | `DELIVERED` (with `date_completed_gmt` as the delivery time) |
//! | `cancelled`, `refunded`, `failed`, `trash` | `CANCELLED` |

use super::{
    date_field, money_field, str_field, AdapterError, ChannelAdapter, FetchPage, SyncWindow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use shared::models::{Channel, ChannelType};
use shared::order::{OrderDraft, OrderStatus};
use tracing::debug;

const PAGE_SIZE: u32 = 50;

pub struct WooCommerceAdapter {
    client: reqwest::Client,
}

impl WooCommerceAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn store_url(channel: &Channel) -> Result<&str, AdapterError> {
        channel
            .store_url
            .as_deref()
            .ok_or_else(|| AdapterError::Misconfigured("missing WooCommerce store URL".into()))
    }

    fn auth_params(channel: &Channel) -> Result<[(String, String); 2], AdapterError> {
        let key = channel.credentials.api_key.as_deref().ok_or_else(|| {
            AdapterError::Misconfigured("missing WooCommerce consumer key".into())
        })?;
        let secret = channel.credentials.api_secret.as_deref().ok_or_else(|| {
            AdapterError::Misconfigured("missing WooCommerce consumer secret".into())
        })?;
        Ok([
            ("consumer_key".into(), key.to_string()),
            ("consumer_secret".into(), secret.to_string()),
        ])
    }

    /// Woo reports GMT dates without an offset suffix
    fn gmt_date(raw: &Value, key: &str) -> Option<DateTime<Utc>> {
        date_field(raw, key).or_else(|| {
            raw.get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok()
                })
                .map(|naive| naive.and_utc())
        })
    }
}

#[async_trait]
impl ChannelAdapter for WooCommerceAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Woocommerce
    }

    async fn fetch_orders(
        &self,
        channel: &Channel,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> Result<FetchPage, AdapterError> {
        let page: u32 = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| AdapterError::Malformed(format!("bad page token: {token}")))?,
            None => 1,
        };

        let url = format!(
            "{}/wp-json/wc/v3/orders",
            Self::store_url(channel)?.trim_end_matches('/')
        );
        let mut query: Vec<(String, String)> = Self::auth_params(channel)?.into();
        query.push(("per_page".into(), PAGE_SIZE.to_string()));
        query.push(("page".into(), page.to_string()));
        query.push(("orderby".into(), "modified".into()));
        query.push(("order".into(), "asc".into()));
        if let Some(since) = window.since {
            query.push(("modified_after".into(), since.to_rfc3339()));
        }
        if let Some(until) = window.until {
            query.push(("modified_before".into(), until.to_rfc3339()));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AdapterError::Auth(format!("WooCommerce returned {status}")));
        }
        if !status.is_success() {
            return Err(AdapterError::Upstream(format!(
                "WooCommerce returned {status}"
            )));
        }

        let body: Value = response.json().await?;
        let raw_orders = body.as_array().cloned().unwrap_or_default();
        let next_page = if raw_orders.len() as u32 == PAGE_SIZE {
            Some((page + 1).to_string())
        } else {
            None
        };

        debug!(channel_id = %channel.id, page, count = raw_orders.len(), "Fetched WooCommerce page");
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
        let billing = raw.get("billing").unwrap_or(&empty);
        let shipping = raw.get("shipping").unwrap_or(&empty);

        let customer_name = match (
            str_field(billing, "first_name"),
            str_field(billing, "last_name"),
        ) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => {
                return Err(AdapterError::Malformed("order without customer name".into()))
            }
        };

        // Shipping block may be blank for pickup orders; billing is the fallback
        let address_street = str_field(shipping, "address_1")
            .or_else(|| str_field(billing, "address_1"))
            .ok_or_else(|| AdapterError::Malformed("order without address".into()))?;
        let address_source = if str_field(shipping, "address_1").is_some() {
            shipping
        } else {
            billing
        };

        let status = self.map_status(raw);
        let delivered_at = if status == OrderStatus::Delivered {
            Self::gmt_date(raw, "date_completed_gmt")
        } else {
            None
        };

        Ok(OrderDraft {
            channel_id: channel.id.clone(),
            external_order_id,
            customer_name,
            customer_phone: str_field(billing, "phone"),
            customer_email: str_field(billing, "email"),
            address_street,
            address_city: str_field(address_source, "city"),
            address_postal_code: str_field(address_source, "postcode"),
            address_notes: str_field(raw, "customer_note"),
            total_amount: money_field(raw, "total").unwrap_or(0.0),
            shipping_cost: money_field(raw, "shipping_total").unwrap_or(0.0),
            status,
            order_date: Self::gmt_date(raw, "date_created_gmt")
                .or_else(|| date_field(raw, "date_created"))
                .unwrap_or_else(Utc::now),
            delivered_at,
        })
    }

    fn map_status(&self, raw: &Value) -> OrderStatus {
        match str_field(raw, "status").as_deref() {
            Some("processing") => OrderStatus::Processing,
            Some("completed") => OrderStatus::Delivered,
            Some("cancelled") | Some("refunded") | Some("failed") | Some("trash") => {
                OrderStatus::Cancelled
            }
            _ => OrderStatus::Pending,
        }
    }

    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<(), AdapterError> {
        let url = format!(
            "{}/wp-json/wc/v3/webhooks",
            Self::store_url(channel)?.trim_end_matches('/')
        );
        let body = json!({
            "name": "Order updates",
            "topic": "order.updated",
            "delivery_url": callback_url,
        });

        let response = self
            .client
            .post(&url)
            .query(&Self::auth_params(channel)?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdapterError::Upstream(format!(
                "webhook registration returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
