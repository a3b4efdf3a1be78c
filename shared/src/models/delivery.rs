//! Delivery-provider exchange types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pickup depot as reported by the delivery provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Depot {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

/// Payload sent to the provider to create a delivery job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Our order ID, echoed back by provider webhooks
    pub order_ref: String,
    pub depot_id: String,
    pub recipient_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_phone: Option<String>,
    pub dropoff_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_notes: Option<String>,
    /// Cash to collect on delivery, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cod_amount: Option<f64>,
}

/// Provider-side job state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Failed,
    Cancelled,
}

/// Snapshot of a delivery job returned by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
