//! Canonical order model
//!
//! The `Order` is the single durable record every event stream converges on:
//! channel sync creates and re-syncs it, the dispatch gateway links it to a
//! delivery job, the webhook reconciler merges provider events into it, and
//! operators override it manually. All of them go through the same invariants.

use super::status::{
    validate_transition, OrderStatus, TransitionError, TransitionSource,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Natural key: the sole deduplication identity for inbound channel orders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub channel_id: String,
    pub external_order_id: String,
}

impl NaturalKey {
    pub fn new(channel_id: impl Into<String>, external_order_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            external_order_id: external_order_id.into(),
        }
    }
}

/// Driver details reported by the delivery provider
///
/// Provider events carry partial blocks; merges are field-level and
/// fill-or-replace, never clearing an already-known field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DriverInfo {
    /// Provider-side carrier id this order is assigned to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl DriverInfo {
    /// Merge another partial block into this one; returns true if changed
    pub fn merge_from(&mut self, other: &DriverInfo) -> bool {
        let mut changed = false;
        for (slot, incoming) in [
            (&mut self.carrier_id, &other.carrier_id),
            (&mut self.name, &other.name),
            (&mut self.phone, &other.phone),
            (&mut self.email, &other.email),
            (&mut self.status, &other.status),
        ] {
            if incoming.is_some() && slot != incoming {
                *slot = incoming.clone();
                changed = true;
            }
        }
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.carrier_id.is_none()
            && self.name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.status.is_none()
    }
}

/// Geographic point attached to a proof-of-delivery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Proof of delivery captured by the carrier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProofOfDelivery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl ProofOfDelivery {
    /// Merge another partial block into this one; returns true if changed
    pub fn merge_from(&mut self, other: &ProofOfDelivery) -> bool {
        let mut changed = false;
        if other.photo_url.is_some() && self.photo_url != other.photo_url {
            self.photo_url = other.photo_url.clone();
            changed = true;
        }
        if other.signature_url.is_some() && self.signature_url != other.signature_url {
            self.signature_url = other.signature_url.clone();
            changed = true;
        }
        if other.location.is_some() && self.location != other.location {
            self.location = other.location;
            changed = true;
        }
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.photo_url.is_none() && self.signature_url.is_none() && self.location.is_none()
    }
}

/// Sparse map of named delivery lifecycle timestamps
///
/// Each field is independently settable and never regresses: a later event
/// carrying an earlier timestamp does not overwrite a later one already
/// recorded (last-writer-wins by event time, not arrival time).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeliveryTimestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_up: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_for_delivery: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<DateTime<Utc>>,
}

/// Fill-from-empty or move forward in time; returns true if the slot changed
fn merge_forward(slot: &mut Option<DateTime<Utc>>, event_time: DateTime<Utc>) -> bool {
    match slot {
        None => {
            *slot = Some(event_time);
            true
        }
        Some(existing) if event_time > *existing => {
            *slot = Some(event_time);
            true
        }
        Some(_) => false,
    }
}

impl DeliveryTimestamps {
    pub fn merge_assigned(&mut self, event_time: DateTime<Utc>) -> bool {
        merge_forward(&mut self.assigned, event_time)
    }

    pub fn merge_picked_up(&mut self, event_time: DateTime<Utc>) -> bool {
        merge_forward(&mut self.picked_up, event_time)
    }

    pub fn merge_out_for_delivery(&mut self, event_time: DateTime<Utc>) -> bool {
        merge_forward(&mut self.out_for_delivery, event_time)
    }

    pub fn merge_delivered(&mut self, event_time: DateTime<Utc>) -> bool {
        merge_forward(&mut self.delivered, event_time)
    }
}

/// Canonical order record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Internal immutable ID
    pub id: String,
    /// Upstream channel this order came from (manual entry is its own channel)
    pub channel_id: String,
    /// Order ID in the upstream system; `(channel_id, external_order_id)` is unique
    pub external_order_id: String,

    // === Customer contact ===
    pub customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,

    // === Delivery address ===
    pub address_street: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_notes: Option<String>,

    // === Money ===
    pub total_amount: f64,
    pub shipping_cost: f64,

    // === Lifecycle ===
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every store write
    #[serde(default)]
    pub version: u64,

    // === Delivery provider linkage ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_tracking_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_info: Option<DriverInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_of_delivery: Option<ProofOfDelivery>,
    #[serde(default)]
    pub delivery_timestamps: DeliveryTimestamps,

    // === Billing linkage ===
    /// Derived: true only once delivered with a provider-confirmed date
    #[serde(default)]
    pub billing_eligible: bool,
    /// Set exactly once when included in an invoice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

impl Order {
    /// Create a new order from an adapter draft, in the draft's mapped status
    pub fn from_draft(draft: &OrderDraft) -> Self {
        let now = Utc::now();
        Self {
            id: crate::util::new_id(),
            channel_id: draft.channel_id.clone(),
            external_order_id: draft.external_order_id.clone(),
            customer_name: draft.customer_name.clone(),
            customer_phone: draft.customer_phone.clone(),
            customer_email: draft.customer_email.clone(),
            address_street: draft.address_street.clone(),
            address_city: draft.address_city.clone(),
            address_postal_code: draft.address_postal_code.clone(),
            address_notes: draft.address_notes.clone(),
            total_amount: draft.total_amount,
            shipping_cost: draft.shipping_cost,
            status: draft.status,
            order_date: draft.order_date,
            created_at: now,
            updated_at: now,
            version: 0,
            delivery_job_id: None,
            delivery_tracking_url: None,
            driver_info: None,
            proof_of_delivery: None,
            delivery_timestamps: DeliveryTimestamps::default(),
            billing_eligible: false,
            invoice_id: None,
        }
    }

    /// The natural key identifying this order across re-syncs
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.channel_id.clone(), self.external_order_id.clone())
    }

    /// Whether the order is closed (terminal status)
    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply the fields that are safe to overwrite on a channel re-sync:
    /// customer contact, address, monetary totals. Returns true if changed.
    ///
    /// Never touches status, delivery linkage, or billing fields.
    pub fn apply_safe_fields(&mut self, draft: &OrderDraft) -> bool {
        let mut changed = false;

        macro_rules! sync_field {
            ($field:ident) => {
                if self.$field != draft.$field {
                    self.$field = draft.$field.clone();
                    changed = true;
                }
            };
        }

        sync_field!(customer_name);
        sync_field!(customer_phone);
        sync_field!(customer_email);
        sync_field!(address_street);
        sync_field!(address_city);
        sync_field!(address_postal_code);
        sync_field!(address_notes);
        if self.total_amount != draft.total_amount {
            self.total_amount = draft.total_amount;
            changed = true;
        }
        if self.shipping_cost != draft.shipping_cost {
            self.shipping_cost = draft.shipping_cost;
            changed = true;
        }

        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Apply a status transition through the state machine
    ///
    /// Entering `delivered` requires a delivery timestamp — either already
    /// recorded from a provider event or passed here by the caller (operator
    /// confirmation for manual orders). That timestamp is what downstream
    /// billing keys on, so `billing_eligible` flips in the same step.
    pub fn apply_transition(
        &mut self,
        requested: OrderStatus,
        source: TransitionSource,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<(), TransitionError> {
        validate_transition(self.status, requested, source)?;

        if requested == OrderStatus::Delivered {
            let ts = delivered_at
                .or(self.delivery_timestamps.delivered)
                .ok_or(TransitionError::MissingDeliveredTimestamp)?;
            self.delivery_timestamps.merge_delivered(ts);
            self.billing_eligible = true;
        }

        self.status = requested;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Adapter output: a canonical draft of one upstream order
///
/// Validated before it reaches the store; validation failures skip the one
/// order and never abort the sync page.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderDraft {
    #[validate(length(min = 1))]
    pub channel_id: String,
    #[validate(length(min = 1))]
    pub external_order_id: String,
    #[validate(length(min = 1))]
    pub customer_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[validate(email)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[validate(length(min = 1))]
    pub address_street: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_notes: Option<String>,
    pub total_amount: f64,
    pub shipping_cost: f64,
    /// Canonical status mapped by the adapter's status-mapping function
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    /// Upstream completion date, required when `status` maps to delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OrderDraft {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.channel_id.clone(), self.external_order_id.clone())
    }
}
