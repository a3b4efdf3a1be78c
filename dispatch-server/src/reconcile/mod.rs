//! Delivery webhook reconciler
//!
//! Folds provider webhook events into canonical orders. The provider
//! redelivers anything we answer retryable, so every path here has to be
//! idempotent: identical redeliveries converge to the same order state and
//! emit nothing the second time. Events we can never use (malformed payloads,
//! unknown jobs) are acknowledged and dropped so they stop coming back.

mod event;

pub use event::{ProviderEvent, ProviderEventType};

use crate::services::NotificationEmitter;
use crate::store::{OrderStore, ReviewFlag, ReviewReason, StoreError};
use dashmap::DashMap;
use http::StatusCode;
use shared::message::NotificationEvent;
use shared::order::{Order, OrderStatus, TransitionError, TransitionSource};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Stale-transition rejections on one order before it is flagged for review
const INVALID_TRANSITION_FLAG_THRESHOLD: u32 = 3;

/// Reconciler errors, split by what the provider should do next
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Acknowledged; redelivery can never succeed
    #[error("malformed provider event: {0}")]
    Malformed(String),

    /// Transient (store busy, etc.); the provider should redeliver
    #[error("transient reconcile failure: {0}")]
    Retryable(String),
}

impl ReconcileError {
    /// Status the webhook route answers with; anything non-5xx stops
    /// redelivery
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Malformed(_) => StatusCode::OK,
            Self::Retryable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        Self::Retryable(err.to_string())
    }
}

/// What handling one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// Something changed; exactly one notification was emitted
    Applied {
        order_id: String,
        new_status: Option<OrderStatus>,
    },
    /// Valid event with nothing new (stale, duplicate, or behind)
    NoChange { order_id: String },
    /// No order carries this job id; acknowledged and discarded
    UnknownJob { job_id: String },
}

/// Net effect of the in-transaction merge
struct ChangeSet {
    fields_changed: bool,
    status_change: Option<(OrderStatus, OrderStatus)>,
    invalid_attempt: bool,
}

pub struct WebhookReconciler {
    store: OrderStore,
    notifier: Arc<dyn NotificationEmitter>,
    /// Per-order tally of rejected provider transitions
    invalid_tallies: DashMap<String, u32>,
}

impl WebhookReconciler {
    pub fn new(store: OrderStore, notifier: Arc<dyn NotificationEmitter>) -> Self {
        Self {
            store,
            notifier,
            invalid_tallies: DashMap::new(),
        }
    }

    /// Handle one raw provider webhook
    pub fn handle_provider_event(
        &self,
        raw: &serde_json::Value,
    ) -> Result<ReconciliationOutcome, ReconcileError> {
        let event = ProviderEvent::parse(raw)?;

        let order = match self.store.find_by_job_id(&event.job_id)? {
            Some(order) => order,
            None => {
                warn!(job_id = %event.job_id, "Webhook for unknown delivery job, discarding");
                return Ok(ReconciliationOutcome::UnknownJob {
                    job_id: event.job_id,
                });
            }
        };
        let order_id = order.id.clone();

        let changes = self
            .store
            .update_with(&order_id, |o| Ok(Self::merge_event(o, &event)))
            .map_err(|err| ReconcileError::Retryable(err.to_string()))?;

        if changes.invalid_attempt {
            self.record_invalid_transition(&order_id, &event);
        }

        if let Some((old, new)) = changes.status_change {
            info!(order_id = %order_id, %old, %new, "Webhook advanced order status");
            self.notifier.emit(NotificationEvent::status_changed(
                &order_id,
                &order.channel_id,
                old,
                new,
            ));
            return Ok(ReconciliationOutcome::Applied {
                order_id,
                new_status: Some(new),
            });
        }
        if changes.fields_changed {
            self.notifier
                .emit(NotificationEvent::delivery_update(&order_id, &order.channel_id));
            return Ok(ReconciliationOutcome::Applied {
                order_id,
                new_status: None,
            });
        }

        debug!(order_id = %order_id, event = ?event.event_type, "Webhook produced no change");
        Ok(ReconciliationOutcome::NoChange { order_id })
    }

    /// Merge one event into one order (runs inside the store's write txn)
    fn merge_event(order: &mut Order, event: &ProviderEvent) -> ChangeSet {
        let was_closed = order.is_closed();
        let mut fields_changed = false;

        if !was_closed {
            if let Some(driver) = &event.driver {
                fields_changed |= order
                    .driver_info
                    .get_or_insert_with(Default::default)
                    .merge_from(driver);
            }
            if let Some(proof) = &event.proof {
                fields_changed |= order
                    .proof_of_delivery
                    .get_or_insert_with(Default::default)
                    .merge_from(proof);
            }
            if let Some(url) = &event.tracking_url
                && order.delivery_tracking_url.as_ref() != Some(url)
            {
                order.delivery_tracking_url = Some(url.clone());
                fields_changed = true;
            }
        }

        fields_changed |= Self::merge_timestamp(order, event);
        // Field-only merges stamp the audit clock too; transitions stamp it
        // inside apply_transition
        if fields_changed {
            order.updated_at = chrono::Utc::now();
        }

        let mut invalid_attempt = false;
        let status_change = if was_closed {
            None
        } else if let Some(target) = event.event_type.target_status() {
            if target == order.status {
                // Benign redelivery of the event that put us here
                None
            } else {
                let old = order.status;
                match order.apply_transition(
                    target,
                    TransitionSource::Automated,
                    Some(event.event_time),
                ) {
                    Ok(()) => Some((old, order.status)),
                    Err(TransitionError::NotForward { .. }) => {
                        invalid_attempt = true;
                        None
                    }
                    Err(_) => None,
                }
            }
        } else {
            None
        };

        ChangeSet {
            fields_changed,
            status_change,
            invalid_attempt,
        }
    }

    /// Record the event's lifecycle timestamp under the forward-only rule
    ///
    /// Delivered orders still accept fill-from-empty: a delayed
    /// out-for-delivery event arriving after the delivered one must land its
    /// timestamp. Cancelled orders accept nothing.
    fn merge_timestamp(order: &mut Order, event: &ProviderEvent) -> bool {
        if order.status == OrderStatus::Cancelled {
            return false;
        }
        let fill_only = order.status == OrderStatus::Delivered;
        let ts = &mut order.delivery_timestamps;

        let slot = match event.event_type {
            ProviderEventType::Assigned => &mut ts.assigned,
            ProviderEventType::PickedUp => &mut ts.picked_up,
            ProviderEventType::InTransit => &mut ts.out_for_delivery,
            ProviderEventType::Delivered => &mut ts.delivered,
            _ => return false,
        };

        match slot {
            None => {
                *slot = Some(event.event_time);
                true
            }
            Some(existing) if !fill_only && event.event_time > *existing => {
                *slot = Some(event.event_time);
                true
            }
            Some(_) => false,
        }
    }

    fn record_invalid_transition(&self, order_id: &str, event: &ProviderEvent) {
        let tally = {
            let mut entry = self.invalid_tallies.entry(order_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        warn!(
            order_id = %order_id,
            event = ?event.event_type,
            tally,
            "Provider sent a transition the state machine rejected"
        );

        if tally < INVALID_TRANSITION_FLAG_THRESHOLD {
            return;
        }
        self.invalid_tallies.remove(order_id);

        let flag = ReviewFlag::new(
            order_id,
            ReviewReason::RepeatedInvalidTransition,
            format!(
                "{tally} rejected provider transitions, last event {:?}",
                event.event_type
            ),
        );
        if let Err(err) = self.store.flag_for_review(&flag) {
            warn!(order_id = %order_id, error = %err, "Failed to record review flag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::RecordingNotifier;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use shared::message::NotificationKind;
    use shared::order::OrderDraft;

    fn setup() -> (WebhookReconciler, OrderStore, Arc<RecordingNotifier>) {
        let store = OrderStore::open_in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let reconciler = WebhookReconciler::new(store.clone(), notifier.clone());
        (reconciler, store, notifier)
    }

    fn seed_dispatched(store: &OrderStore, job_id: &str, status: OrderStatus) -> Order {
        let draft = OrderDraft {
            channel_id: "ch-1".to_string(),
            external_order_id: format!("EXT-{job_id}"),
            customer_name: "Ana García".to_string(),
            customer_phone: None,
            customer_email: None,
            address_street: "Av. Corrientes 1234".to_string(),
            address_city: None,
            address_postal_code: None,
            address_notes: None,
            total_amount: 100.0,
            shipping_cost: 10.0,
            status,
            order_date: Utc::now(),
            delivered_at: None,
        };
        let order = Order::from_draft(&draft);
        store.insert_new(&order).unwrap();
        store
            .update_with(&order.id, |o| {
                o.delivery_job_id = Some(job_id.to_string());
                Ok(())
            })
            .unwrap();
        store.get(&order.id).unwrap().unwrap()
    }

    #[test]
    fn test_unknown_job_is_acknowledged() {
        let (reconciler, _, notifier) = setup();
        let outcome = reconciler
            .handle_provider_event(&json!({"job_id": "J-nope", "event": "assigned"}))
            .unwrap();
        assert_eq!(
            outcome,
            ReconciliationOutcome::UnknownJob {
                job_id: "J-nope".to_string()
            }
        );
        assert!(notifier.kinds().is_empty());
    }

    #[test]
    fn test_event_applies_status_and_driver() {
        let (reconciler, store, notifier) = setup();
        let order = seed_dispatched(&store, "J1", OrderStatus::ReadyForPickup);

        let outcome = reconciler
            .handle_provider_event(&json!({
                "job_id": "J1",
                "event": "assigned",
                "event_time": "2024-05-02T09:00:00+00:00",
                "carrier": {"id": "c-7", "name": "Marcos"}
            }))
            .unwrap();

        assert_eq!(
            outcome,
            ReconciliationOutcome::Applied {
                order_id: order.id.clone(),
                new_status: Some(OrderStatus::Assigned)
            }
        );
        let stored = store.get(&order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Assigned);
        assert_eq!(
            stored.driver_info.unwrap().carrier_id.as_deref(),
            Some("c-7")
        );
        assert_eq!(
            stored.delivery_timestamps.assigned,
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap())
        );
        assert_eq!(notifier.kinds(), vec![NotificationKind::StatusChanged]);
    }

    #[test]
    fn test_identical_redelivery_is_noop_without_notification() {
        let (reconciler, store, notifier) = setup();
        let order = seed_dispatched(&store, "J1", OrderStatus::ReadyForPickup);
        let payload = json!({
            "job_id": "J1",
            "event": "assigned",
            "event_time": "2024-05-02T09:00:00+00:00",
            "carrier": {"id": "c-7"}
        });

        reconciler.handle_provider_event(&payload).unwrap();
        let first = store.get(&order.id).unwrap().unwrap();

        let outcome = reconciler.handle_provider_event(&payload).unwrap();
        assert_eq!(
            outcome,
            ReconciliationOutcome::NoChange {
                order_id: order.id.clone()
            }
        );
        let second = store.get(&order.id).unwrap().unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.driver_info, second.driver_info);
        assert_eq!(first.delivery_timestamps, second.delivery_timestamps);
        assert_eq!(notifier.kinds(), vec![NotificationKind::StatusChanged]);
    }

    #[test]
    fn test_picked_up_while_processing_skips_ahead() {
        let (reconciler, store, _) = setup();
        let order = seed_dispatched(&store, "J1", OrderStatus::Processing);

        reconciler
            .handle_provider_event(&json!({"job_id": "J1", "event": "picked_up"}))
            .unwrap();

        let stored = store.get(&order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::OutForDelivery);
        assert!(stored.delivery_timestamps.picked_up.is_some());
    }

    #[test]
    fn test_stale_event_discarded_and_flagged_after_repeats() {
        let (reconciler, store, _) = setup();
        let order = seed_dispatched(&store, "J1", OrderStatus::OutForDelivery);

        for _ in 0..3 {
            let outcome = reconciler
                .handle_provider_event(&json!({"job_id": "J1", "event": "assigned"}))
                .unwrap();
            // assigned is behind out_for_delivery: rejected, status preserved
            assert!(matches!(outcome, ReconciliationOutcome::NoChange { .. }
                | ReconciliationOutcome::Applied { new_status: None, .. }));
        }

        let stored = store.get(&order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::OutForDelivery);

        let flags = store.open_review_flags().unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].reason, ReviewReason::RepeatedInvalidTransition);
        assert_eq!(flags[0].order_id, order.id);
    }

    #[test]
    fn test_closed_order_freezes_status_and_driver() {
        let (reconciler, store, _) = setup();
        let order = seed_dispatched(&store, "J1", OrderStatus::OutForDelivery);
        reconciler
            .handle_provider_event(&json!({
                "job_id": "J1", "event": "delivered",
                "event_time": "2024-05-02T10:00:00+00:00"
            }))
            .unwrap();

        // Provider keeps talking after delivery; nothing moves
        reconciler
            .handle_provider_event(&json!({
                "job_id": "J1", "event": "failed",
                "carrier": {"name": "Someone Else"}
            }))
            .unwrap();

        let stored = store.get(&order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Delivered);
        assert!(stored.driver_info.is_none());
        assert!(stored.billing_eligible);
    }

    #[test]
    fn test_delayed_events_converge_regardless_of_arrival_order() {
        let delivered = json!({
            "job_id": "J1", "event": "delivered",
            "event_time": "2024-05-02T10:00:00+00:00"
        });
        let out_for_delivery = json!({
            "job_id": "J1", "event": "out_for_delivery",
            "event_time": "2024-05-02T09:58:00+00:00"
        });
        let t_ofd = Utc.with_ymd_and_hms(2024, 5, 2, 9, 58, 0).unwrap();
        let t_del = Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap();

        for payloads in [
            [&out_for_delivery, &delivered],
            [&delivered, &out_for_delivery],
        ] {
            let (reconciler, store, _) = setup();
            let order = seed_dispatched(&store, "J1", OrderStatus::Assigned);

            for payload in payloads {
                reconciler.handle_provider_event(payload).unwrap();
            }

            let stored = store.get(&order.id).unwrap().unwrap();
            assert_eq!(stored.status, OrderStatus::Delivered);
            assert_eq!(stored.delivery_timestamps.out_for_delivery, Some(t_ofd));
            assert_eq!(stored.delivery_timestamps.delivered, Some(t_del));
        }
    }

    #[test]
    fn test_malformed_payload_maps_to_ack() {
        let (reconciler, _, _) = setup();
        let err = reconciler
            .handle_provider_event(&json!({"event": "assigned"}))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Malformed(_)));
        assert_eq!(err.http_status(), StatusCode::OK);
        assert_eq!(
            ReconcileError::Retryable("busy".into()).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_driver_update_merges_without_status_change() {
        let (reconciler, store, notifier) = setup();
        let order = seed_dispatched(&store, "J1", OrderStatus::OutForDelivery);

        let outcome = reconciler
            .handle_provider_event(&json!({
                "job_id": "J1",
                "event": "driver_update",
                "carrier": {"phone": "+54 11 5555-0200"},
                "tracking_url": "https://track.example/J1"
            }))
            .unwrap();

        assert_eq!(
            outcome,
            ReconciliationOutcome::Applied {
                order_id: order.id.clone(),
                new_status: None
            }
        );
        let stored = store.get(&order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::OutForDelivery);
        assert_eq!(
            stored.delivery_tracking_url.as_deref(),
            Some("https://track.example/J1")
        );
        // A field-only merge still moves the audit clock
        assert!(stored.updated_at > order.updated_at);
        assert_eq!(notifier.kinds(), vec![NotificationKind::DeliveryUpdate]);
    }
}
