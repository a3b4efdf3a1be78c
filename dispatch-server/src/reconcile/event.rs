//! Provider webhook payload parsing
//!
//! The wire shape is provider-defined; the contract is only: a job id, an
//! event type, and optional carrier / proof / timestamp blocks. Anything we
//! cannot make sense of is malformed and gets acknowledged so the provider
//! stops redelivering it.

use super::ReconcileError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::order::{DriverInfo, GeoPoint, OrderStatus, ProofOfDelivery};

/// Provider-side event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventType {
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    DeliveryFailed,
    Cancelled,
    /// Carrier/location detail change with no lifecycle meaning
    DriverUpdate,
}

impl ProviderEventType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "assigned" | "carrier_assigned" => Some(Self::Assigned),
            "picked_up" | "pickup_completed" => Some(Self::PickedUp),
            "in_transit" | "out_for_delivery" => Some(Self::InTransit),
            "delivered" | "delivery_completed" => Some(Self::Delivered),
            "failed" | "delivery_failed" | "not_delivered" => Some(Self::DeliveryFailed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "driver_update" | "location_update" => Some(Self::DriverUpdate),
            _ => None,
        }
    }

    /// Canonical status this event drives the order toward, if any
    ///
    /// `picked_up` maps to out-for-delivery: the parcel leaving the depot is
    /// the start of the delivery leg, and skipping intermediate states is
    /// allowed by the transition rules anyway.
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            Self::Assigned => Some(OrderStatus::Assigned),
            Self::PickedUp | Self::InTransit => Some(OrderStatus::OutForDelivery),
            Self::Delivered => Some(OrderStatus::Delivered),
            Self::DeliveryFailed => Some(OrderStatus::FailedDelivery),
            Self::Cancelled => Some(OrderStatus::Cancelled),
            Self::DriverUpdate => None,
        }
    }
}

/// Parsed provider event
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub job_id: String,
    pub event_type: ProviderEventType,
    /// Provider-reported event time; arrival time when absent
    pub event_time: DateTime<Utc>,
    pub tracking_url: Option<String>,
    pub driver: Option<DriverInfo>,
    pub proof: Option<ProofOfDelivery>,
    pub failure_reason: Option<String>,
}

impl ProviderEvent {
    pub fn parse(raw: &Value) -> Result<Self, ReconcileError> {
        let job_id = raw
            .get("job_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReconcileError::Malformed("missing job_id".into()))?
            .to_string();

        let event_str = raw
            .get("event")
            .or_else(|| raw.get("event_type"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ReconcileError::Malformed("missing event type".into()))?;
        let event_type = ProviderEventType::parse(event_str)
            .ok_or_else(|| ReconcileError::Malformed(format!("unknown event type: {event_str}")))?;

        let event_time = raw
            .get("event_time")
            .or_else(|| raw.get("occurred_at"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let driver = raw.get("carrier").and_then(Self::parse_driver);
        let proof = raw.get("proof").and_then(Self::parse_proof);

        Ok(Self {
            job_id,
            event_type,
            event_time,
            tracking_url: raw
                .get("tracking_url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            driver,
            proof,
            failure_reason: raw
                .get("reason")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    fn parse_driver(block: &Value) -> Option<DriverInfo> {
        let driver = DriverInfo {
            carrier_id: block
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            name: block
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            phone: block
                .get("phone")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            email: block
                .get("email")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            status: block
                .get("status")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        };
        (!driver.is_empty()).then_some(driver)
    }

    fn parse_proof(block: &Value) -> Option<ProofOfDelivery> {
        let location = match (
            block.pointer("/location/lat").and_then(|v| v.as_f64()),
            block.pointer("/location/lng").and_then(|v| v.as_f64()),
        ) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        };
        let proof = ProofOfDelivery {
            photo_url: block
                .get("photo_url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            signature_url: block
                .get("signature_url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            location,
        };
        (!proof.is_empty()).then_some(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_full_event() {
        let raw = json!({
            "job_id": "J1",
            "event": "delivered",
            "event_time": "2024-05-02T10:00:00+00:00",
            "tracking_url": "https://track.example/J1",
            "carrier": {"id": "c-7", "name": "Marcos", "phone": "+54 11 5555-0200"},
            "proof": {
                "photo_url": "https://img.example/p1.jpg",
                "location": {"lat": -34.6, "lng": -58.4}
            }
        });

        let event = ProviderEvent::parse(&raw).unwrap();
        assert_eq!(event.job_id, "J1");
        assert_eq!(event.event_type, ProviderEventType::Delivered);
        assert_eq!(
            event.event_time,
            Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap()
        );
        let driver = event.driver.unwrap();
        assert_eq!(driver.carrier_id.as_deref(), Some("c-7"));
        let proof = event.proof.unwrap();
        assert_eq!(proof.location.unwrap().lat, -34.6);
    }

    #[test]
    fn test_missing_event_time_falls_back_to_arrival() {
        let before = Utc::now();
        let event =
            ProviderEvent::parse(&json!({"job_id": "J1", "event": "assigned"})).unwrap();
        assert!(event.event_time >= before);
    }

    #[test]
    fn test_malformed_payloads() {
        for raw in [
            json!({"event": "assigned"}),
            json!({"job_id": "", "event": "assigned"}),
            json!({"job_id": "J1"}),
            json!({"job_id": "J1", "event": "teleported"}),
        ] {
            let err = ProviderEvent::parse(&raw).unwrap_err();
            assert!(matches!(err, ReconcileError::Malformed(_)), "raw: {raw}");
        }
    }

    #[test]
    fn test_picked_up_targets_out_for_delivery() {
        assert_eq!(
            ProviderEventType::PickedUp.target_status(),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(ProviderEventType::DriverUpdate.target_status(), None);
    }
}
