//! Dispatch gateway
//!
//! The only path from an order to a delivery job. Remote job creation happens
//! before any store lock is taken (the provider call can be slow; the store's
//! single writer must not wait on it), then the job id is persisted through
//! `update_with`. The gap between those two steps is where a crash or store
//! failure leaves a remote job nobody owns; that case is flagged as
//! `OrphanedRemoteJob` for manual review rather than silently retried, since
//! retrying would create a second remote job.

use super::depot::DepotCache;
use super::provider::{DeliveryProvider, ProviderError};
use super::rate_limit::RateLimiter;
use crate::services::NotificationEmitter;
use crate::store::{OrderStore, ReviewFlag, ReviewReason, StoreError};
use shared::message::NotificationEvent;
use shared::models::DispatchRequest;
use shared::order::{Order, OrderStatus, TransitionError, TransitionSource};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Bounded retries when the provider answers 429
const MAX_PROVIDER_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("order {order_id} is closed ({status}), not dispatchable")]
    OrderClosed {
        order_id: String,
        status: OrderStatus,
    },

    #[error("order {0} has no delivery job yet")]
    NotDispatched(String),

    #[error("order {order_id} already assigned to carrier {existing}")]
    CarrierConflict { order_id: String, existing: String },

    /// Remote job exists but the local link could not be persisted
    #[error("remote job {job_id} created but not linked to order {order_id}")]
    OrphanedRemoteJob { order_id: String, job_id: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reference to the delivery job linked to an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryJobRef {
    pub job_id: String,
    pub tracking_url: Option<String>,
}

/// Outcome of a bulk carrier assignment
#[derive(Debug, Default)]
pub struct BulkAssignReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct DispatchGateway {
    store: OrderStore,
    provider: Arc<dyn DeliveryProvider>,
    rate_limiter: Arc<RateLimiter>,
    depot_cache: DepotCache,
    notifier: Arc<dyn NotificationEmitter>,
}

impl DispatchGateway {
    pub fn new(
        store: OrderStore,
        provider: Arc<dyn DeliveryProvider>,
        rate_limiter: Arc<RateLimiter>,
        depot_cache: DepotCache,
        notifier: Arc<dyn NotificationEmitter>,
    ) -> Self {
        Self {
            store,
            provider,
            rate_limiter,
            depot_cache,
            notifier,
        }
    }

    /// Create (or return) the delivery job for an order
    ///
    /// Idempotent: an order that already carries a `delivery_job_id` returns
    /// that reference without any remote call.
    pub async fn dispatch(&self, order_id: &str) -> Result<DeliveryJobRef, DispatchError> {
        let order = self
            .store
            .get(order_id)?
            .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;

        if let Some(job_id) = &order.delivery_job_id {
            return Ok(DeliveryJobRef {
                job_id: job_id.clone(),
                tracking_url: order.delivery_tracking_url.clone(),
            });
        }
        if order.is_closed() {
            return Err(DispatchError::OrderClosed {
                order_id: order_id.to_string(),
                status: order.status,
            });
        }

        let depot_id = self
            .depot_cache
            .get_or_refresh(|| async {
                let depots = self.provider.list_depots().await?;
                depots
                    .into_iter()
                    .next()
                    .map(|d| d.id)
                    .ok_or_else(|| ProviderError::Rejected("provider has no depots".into()))
            })
            .await?;

        let request = Self::build_request(&order, &depot_id);
        let snapshot = self.call_provider_with_backoff(&request).await?;
        let job_id = snapshot.job_id.clone();

        // The remote job exists from here on; a persist failure must not be
        // retried into a second job
        let persisted = self.store.update_with(order_id, |o| {
            o.delivery_job_id = Some(job_id.clone());
            o.delivery_tracking_url = snapshot.tracking_url.clone();
            match o.apply_transition(OrderStatus::Assigned, TransitionSource::Automated, None) {
                Ok(()) | Err(TransitionError::NotForward { .. }) => {}
                Err(err) => return Err(err.into()),
            }
            o.delivery_timestamps.merge_assigned(chrono::Utc::now());
            Ok(())
        });

        if let Err(err) = persisted {
            error!(order_id, job_id = %job_id, error = %err, "Remote job created but link persist failed");
            let flag = ReviewFlag::new(
                order_id,
                ReviewReason::OrphanedRemoteJob,
                format!("remote job {job_id} not linked: {err}"),
            );
            if let Err(flag_err) = self.store.flag_for_review(&flag) {
                error!(order_id, error = %flag_err, "Failed to record orphaned-job review flag");
            }
            return Err(DispatchError::OrphanedRemoteJob {
                order_id: order_id.to_string(),
                job_id,
            });
        }

        info!(order_id, job_id = %job_id, "Order dispatched");
        self.notifier
            .emit(NotificationEvent::delivery_update(order_id, &order.channel_id));

        Ok(DeliveryJobRef {
            job_id,
            tracking_url: snapshot.tracking_url,
        })
    }

    /// Assign a carrier to an already-dispatched order
    ///
    /// No-op when the same carrier is already assigned; a different carrier
    /// is a conflict the operator has to resolve.
    pub async fn assign_carrier(
        &self,
        order_id: &str,
        carrier_id: &str,
    ) -> Result<(), DispatchError> {
        let order = self
            .store
            .get(order_id)?
            .ok_or_else(|| DispatchError::OrderNotFound(order_id.to_string()))?;

        if order.is_closed() {
            return Err(DispatchError::OrderClosed {
                order_id: order_id.to_string(),
                status: order.status,
            });
        }

        let job_id = order
            .delivery_job_id
            .clone()
            .ok_or_else(|| DispatchError::NotDispatched(order_id.to_string()))?;

        if let Some(existing) = order.driver_info.as_ref().and_then(|d| d.carrier_id.as_deref()) {
            if existing == carrier_id {
                return Ok(());
            }
            return Err(DispatchError::CarrierConflict {
                order_id: order_id.to_string(),
                existing: existing.to_string(),
            });
        }

        self.rate_limiter.acquire().await;
        self.provider.assign_carrier(&job_id, carrier_id).await?;

        self.store.update_with(order_id, |o| {
            o.driver_info
                .get_or_insert_with(Default::default)
                .carrier_id = Some(carrier_id.to_string());
            Ok(())
        })?;

        self.notifier
            .emit(NotificationEvent::delivery_update(order_id, &order.channel_id));
        Ok(())
    }

    /// Assign carriers to many orders, serialized through the shared limiter
    ///
    /// Never atomic: each order succeeds or fails on its own and the report
    /// carries both lists.
    pub async fn bulk_assign(&self, assignments: &[(String, String)]) -> BulkAssignReport {
        let mut report = BulkAssignReport::default();

        for (order_id, carrier_id) in assignments {
            match self.assign_carrier(order_id, carrier_id).await {
                Ok(()) => report.succeeded.push(order_id.clone()),
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "Bulk assignment entry failed");
                    report.failed.push((order_id.clone(), err.to_string()));
                }
            }
        }

        report
    }

    fn build_request(order: &Order, depot_id: &str) -> DispatchRequest {
        let mut dropoff_address = order.address_street.clone();
        if let Some(city) = &order.address_city {
            dropoff_address = format!("{dropoff_address}, {city}");
        }
        if let Some(zip) = &order.address_postal_code {
            dropoff_address = format!("{dropoff_address} ({zip})");
        }

        DispatchRequest {
            order_ref: order.id.clone(),
            depot_id: depot_id.to_string(),
            recipient_name: order.customer_name.clone(),
            recipient_phone: order.customer_phone.clone(),
            dropoff_address,
            dropoff_notes: order.address_notes.clone(),
            cod_amount: None,
        }
    }

    /// Create the remote job, backing off on 429 up to the attempt ceiling
    async fn call_provider_with_backoff(
        &self,
        request: &DispatchRequest,
    ) -> Result<shared::models::JobSnapshot, ProviderError> {
        let mut delay = INITIAL_BACKOFF;

        for attempt in 0..MAX_PROVIDER_ATTEMPTS {
            self.rate_limiter.acquire().await;
            match self.provider.create_job(request).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(ProviderError::RateLimited) if attempt + 1 < MAX_PROVIDER_ATTEMPTS => {
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Provider rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!()
    }
}
