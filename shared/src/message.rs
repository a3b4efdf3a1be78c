//! Domain notifications emitted to downstream consumers
//!
//! The engine emits these on confirmed state changes; delivery transport
//! (email, push, websocket fan-out) lives behind the emitter boundary in the
//! server crate. At most one notification per confirmed change.

use crate::order::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What changed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A new order entered the store
    OrderCreated,
    /// The canonical status moved
    StatusChanged,
    /// Delivery details changed without a status move (driver, tracking, ETA)
    DeliveryUpdate,
}

/// A single domain notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub order_id: String,
    pub channel_id: String,
    /// Present on `StatusChanged`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<OrderStatus>,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn order_created(order_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::OrderCreated,
            order_id: order_id.into(),
            channel_id: channel_id.into(),
            old_status: None,
            new_status: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn status_changed(
        order_id: impl Into<String>,
        channel_id: impl Into<String>,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) -> Self {
        Self {
            kind: NotificationKind::StatusChanged,
            order_id: order_id.into(),
            channel_id: channel_id.into(),
            old_status: Some(old_status),
            new_status: Some(new_status),
            occurred_at: Utc::now(),
        }
    }

    pub fn delivery_update(order_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::DeliveryUpdate,
            order_id: order_id.into(),
            channel_id: channel_id.into(),
            old_status: None,
            new_status: None,
            occurred_at: Utc::now(),
        }
    }
}
