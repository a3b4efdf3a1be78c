//! Shopify adapter
//!
//! Pulls from the Admin REST API (`orders.json`), cursor-paginated via the
//! `page_info` token carried in the `Link` response header.
//!
//! # Status mapping
//!
//! Shopify splits order state across `financial_status`,
//! `fulfillment_status` and `cancelled_at`:
//!
//! - `cancelled_at` set → `CANCELLED`
//! - `fulfillment_status = "fulfilled"` → `PROCESSING`; "fulfilled" means the
//!   seller handed the parcel over, not that the customer has it. Only when
//!   carrier confirmation is present (`carrier_confirmed` flag or a tracking
//!   company on the fulfillment) does it map to `DELIVERED`.
//! - `financial_status = "paid"` / `"partially_paid"` → `PROCESSING`
//! - anything else → `PENDING`

use super::{
    date_field, money_field, str_field, AdapterError, ChannelAdapter, FetchPage, SyncWindow,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use shared::models::{Channel, ChannelType};
use shared::order::{OrderDraft, OrderStatus};
use tracing::debug;

const API_VERSION: &str = "2024-01";
const PAGE_SIZE: u32 = 50;

pub struct ShopifyAdapter {
    client: reqwest::Client,
}

impl ShopifyAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn access_token(channel: &Channel) -> Result<&str, AdapterError> {
        channel
            .credentials
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::Misconfigured("missing Shopify access token".into()))
    }

    fn store_url(channel: &Channel) -> Result<&str, AdapterError> {
        channel
            .store_url
            .as_deref()
            .ok_or_else(|| AdapterError::Misconfigured("missing Shopify store URL".into()))
    }

    /// Carrier confirmation: the explicit flag, or a tracking company on any
    /// fulfillment
    fn carrier_confirmed(raw: &Value) -> bool {
        if raw
            .get("carrier_confirmed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return true;
        }
        raw.get("fulfillments")
            .and_then(|v| v.as_array())
            .is_some_and(|fs| {
                fs.iter()
                    .any(|f| str_field(f, "tracking_company").is_some())
            })
    }

    /// Extract the `page_info` cursor from the `Link` header's `rel="next"` part
    fn next_page_token(link_header: Option<&str>) -> Option<String> {
        let link = link_header?;
        for part in link.split(',') {
            if !part.contains("rel=\"next\"") {
                continue;
            }
            let url = part.split('<').nth(1)?.split('>').next()?;
            for param in url.split('?').nth(1)?.split('&') {
                if let Some(token) = param.strip_prefix("page_info=") {
                    return Some(token.to_string());
                }
            }
        }
        None
    }
}

#[async_trait]
impl ChannelAdapter for ShopifyAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Shopify
    }

    async fn fetch_orders(
        &self,
        channel: &Channel,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> Result<FetchPage, AdapterError> {
        let url = format!(
            "{}/admin/api/{}/orders.json",
            Self::store_url(channel)?.trim_end_matches('/'),
            API_VERSION
        );

        let mut query: Vec<(String, String)> = vec![
            ("status".into(), "any".into()),
            ("limit".into(), PAGE_SIZE.to_string()),
        ];
        match page_token {
            // Shopify rejects filter params alongside a page_info cursor
            Some(token) => query.push(("page_info".into(), token.to_string())),
            None => {
                if let Some(since) = window.since {
                    query.push(("updated_at_min".into(), since.to_rfc3339()));
                }
                if let Some(until) = window.until {
                    query.push(("updated_at_max".into(), until.to_rfc3339()));
                }
            }
        }

        let response = self
            .client
            .get(&url)
            .header("X-Shopify-Access-Token", Self::access_token(channel)?)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AdapterError::Auth(format!("Shopify returned {status}")));
        }
        if !status.is_success() {
            return Err(AdapterError::Upstream(format!("Shopify returned {status}")));
        }

        let next_page = Self::next_page_token(
            response
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok()),
        );

        let body: Value = response.json().await?;
        let raw_orders = body
            .get("orders")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        debug!(channel_id = %channel.id, count = raw_orders.len(), has_next = next_page.is_some(), "Fetched Shopify page");
        Ok(FetchPage {
            raw_orders,
            next_page,
        })
    }

    fn to_draft(&self, channel: &Channel, raw: &Value) -> Result<OrderDraft, AdapterError> {
        let external_order_id = raw
            .get("id")
            .map(|v| match v {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| AdapterError::Malformed("order without id".into()))?;

        let empty = json!({});
        let customer = raw.get("customer").unwrap_or(&empty);
        let shipping = raw.get("shipping_address").unwrap_or(&empty);

        let customer_name = match (
            str_field(customer, "first_name"),
            str_field(customer, "last_name"),
        ) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(one), None) | (None, Some(one)) => one,
            (None, None) => str_field(shipping, "name")
                .ok_or_else(|| AdapterError::Malformed("order without customer name".into()))?,
        };

        let status = self.map_status(raw);
        let delivered_at = if status == OrderStatus::Delivered {
            raw.get("fulfillments")
                .and_then(|v| v.as_array())
                .and_then(|fs| fs.iter().find_map(|f| date_field(f, "updated_at")))
                .or_else(|| date_field(raw, "updated_at"))
        } else {
            None
        };

        Ok(OrderDraft {
            channel_id: channel.id.clone(),
            external_order_id,
            customer_name,
            customer_phone: str_field(customer, "phone").or_else(|| str_field(shipping, "phone")),
            customer_email: str_field(raw, "email").or_else(|| str_field(customer, "email")),
            address_street: str_field(shipping, "address1")
                .ok_or_else(|| AdapterError::Malformed("order without shipping address".into()))?,
            address_city: str_field(shipping, "city"),
            address_postal_code: str_field(shipping, "zip"),
            address_notes: str_field(raw, "note"),
            total_amount: money_field(raw, "total_price").unwrap_or(0.0),
            shipping_cost: raw
                .get("shipping_lines")
                .and_then(|v| v.as_array())
                .map(|lines| lines.iter().filter_map(|l| money_field(l, "price")).sum())
                .unwrap_or(0.0),
            status,
            order_date: date_field(raw, "created_at").unwrap_or_else(Utc::now),
            delivered_at,
        })
    }

    fn map_status(&self, raw: &Value) -> OrderStatus {
        if raw.get("cancelled_at").is_some_and(|v| !v.is_null()) {
            return OrderStatus::Cancelled;
        }
        if str_field(raw, "fulfillment_status").as_deref() == Some("fulfilled") {
            return if Self::carrier_confirmed(raw) {
                OrderStatus::Delivered
            } else {
                OrderStatus::Processing
            };
        }
        match str_field(raw, "financial_status").as_deref() {
            Some("paid") | Some("partially_paid") => OrderStatus::Processing,
            _ => OrderStatus::Pending,
        }
    }

    async fn register_webhook(
        &self,
        channel: &Channel,
        callback_url: &str,
    ) -> Result<(), AdapterError> {
        let url = format!(
            "{}/admin/api/{}/webhooks.json",
            Self::store_url(channel)?.trim_end_matches('/'),
            API_VERSION
        );
        let body = json!({
            "webhook": {
                "topic": "orders/updated",
                "address": callback_url,
                "format": "json",
            }
        });

        let response = self
            .client
            .post(&url)
            .header("X-Shopify-Access-Token", Self::access_token(channel)?)
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn channel() -> Channel {
        Channel {
            id: "ch-shopify".to_string(),
            merchant_id: "m-1".to_string(),
            channel_type: ChannelType::Shopify,
            name: "Test store".to_string(),
            store_url: Some("https://test.myshopify.com".to_string()),
            credentials: Default::default(),
            enabled: true,
            last_synced_at: None,
            created_at: Utc::now(),
        }
    }

    fn raw_order() -> Value {
        json!({
            "id": 450789469,
            "email": "bob@example.com",
            "created_at": "2024-05-01T10:00:00+00:00",
            "updated_at": "2024-05-02T08:00:00+00:00",
            "note": "ring the bell",
            "financial_status": "paid",
            "fulfillment_status": null,
            "cancelled_at": null,
            "total_price": "409.94",
            "shipping_lines": [{"price": "10.00"}],
            "customer": {"first_name": "Bob", "last_name": "Norman", "phone": "+1 555 0100"},
            "shipping_address": {"address1": "Chestnut Street 92", "city": "Louisville", "zip": "40202"}
        })
    }

    fn adapter() -> ShopifyAdapter {
        ShopifyAdapter::new(reqwest::Client::new())
    }

    #[test]
    fn test_paid_unfulfilled_maps_to_processing() {
        assert_eq!(adapter().map_status(&raw_order()), OrderStatus::Processing);
    }

    #[test]
    fn test_fulfilled_without_carrier_confirmation_is_processing() {
        let mut raw = raw_order();
        raw["fulfillment_status"] = json!("fulfilled");
        assert_eq!(adapter().map_status(&raw), OrderStatus::Processing);
    }

    #[test]
    fn test_fulfilled_with_carrier_confirmation_is_delivered() {
        let mut raw = raw_order();
        raw["fulfillment_status"] = json!("fulfilled");
        raw["carrier_confirmed"] = json!(true);
        assert_eq!(adapter().map_status(&raw), OrderStatus::Delivered);

        let mut raw = raw_order();
        raw["fulfillment_status"] = json!("fulfilled");
        raw["fulfillments"] = json!([{"tracking_company": "DHL", "updated_at": "2024-05-02T08:00:00Z"}]);
        assert_eq!(adapter().map_status(&raw), OrderStatus::Delivered);
    }

    #[test]
    fn test_cancelled_wins_over_everything() {
        let mut raw = raw_order();
        raw["cancelled_at"] = json!("2024-05-02T08:00:00Z");
        raw["fulfillment_status"] = json!("fulfilled");
        assert_eq!(adapter().map_status(&raw), OrderStatus::Cancelled);
    }

    #[test]
    fn test_to_draft_extracts_fields() {
        let draft = adapter().to_draft(&channel(), &raw_order()).unwrap();
        assert_eq!(draft.channel_id, "ch-shopify");
        assert_eq!(draft.external_order_id, "450789469");
        assert_eq!(draft.customer_name, "Bob Norman");
        assert_eq!(draft.customer_email.as_deref(), Some("bob@example.com"));
        assert_eq!(draft.address_street, "Chestnut Street 92");
        assert_eq!(draft.total_amount, 409.94);
        assert_eq!(draft.shipping_cost, 10.0);
        assert_eq!(draft.status, OrderStatus::Processing);
        assert_eq!(
            draft.order_date,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
        assert!(draft.delivered_at.is_none());
    }

    #[test]
    fn test_delivered_draft_carries_fulfillment_date() {
        let mut raw = raw_order();
        raw["fulfillment_status"] = json!("fulfilled");
        raw["fulfillments"] =
            json!([{"tracking_company": "DHL", "updated_at": "2024-05-02T07:30:00+00:00"}]);

        let draft = adapter().to_draft(&channel(), &raw).unwrap();
        assert_eq!(draft.status, OrderStatus::Delivered);
        assert_eq!(
            draft.delivered_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 7, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_to_draft_missing_address_is_malformed() {
        let mut raw = raw_order();
        raw.as_object_mut().unwrap().remove("shipping_address");
        let err = adapter().to_draft(&channel(), &raw).unwrap_err();
        assert!(matches!(err, AdapterError::Malformed(_)));
    }

    #[test]
    fn test_link_header_next_token() {
        let link = "<https://test.myshopify.com/admin/api/2024-01/orders.json?limit=50&page_info=abc123>; rel=\"next\"";
        assert_eq!(
            ShopifyAdapter::next_page_token(Some(link)),
            Some("abc123".to_string())
        );

        let prev_only = "<https://x/orders.json?page_info=zzz>; rel=\"previous\"";
        assert_eq!(ShopifyAdapter::next_page_token(Some(prev_only)), None);
        assert_eq!(ShopifyAdapter::next_page_token(None), None);
    }
}
