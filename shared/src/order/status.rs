//! Order status state machine
//!
//! One tagged enum shared by every component (sync engine, dispatch gateway,
//! webhook reconciler, manual overrides), with the transition table below as
//! the single source of truth for validity.
//!
//! # Happy path
//!
//! ```text
//! pending → processing → ready_for_pickup → assigned → out_for_delivery → delivered
//! ```
//!
//! `cancelled` is reachable from any non-terminal state. `failed_delivery` is
//! a lateral state off the happy path: reachable only from `out_for_delivery`,
//! retryable back to `assigned`, and forward to `out_for_delivery`,
//! `delivered` or `cancelled`. `delivered` and `cancelled` are terminal — the
//! order is closed and accepts no further status writes from any source.

use crate::error::{AppError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Canonical order status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Ingested, not yet prepared
    #[default]
    Pending,
    /// Being prepared by the seller
    Processing,
    /// Packed, waiting for carrier pickup
    ReadyForPickup,
    /// Delivery job assigned to a carrier
    Assigned,
    /// Carrier en route to the customer
    OutForDelivery,
    /// Delivery attempt failed; retryable back to assigned
    FailedDelivery,
    /// Delivered and provider-confirmed (terminal)
    Delivered,
    /// Cancelled (terminal)
    Cancelled,
}

impl OrderStatus {
    /// Whether the order is closed (no further mutations accepted)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Position on the happy-path ordering; `None` for the lateral states
    fn happy_path_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Processing => Some(1),
            Self::ReadyForPickup => Some(2),
            Self::Assigned => Some(3),
            Self::OutForDelivery => Some(4),
            Self::Delivered => Some(5),
            Self::FailedDelivery | Self::Cancelled => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::ReadyForPickup => "READY_FOR_PICKUP",
            Self::Assigned => "ASSIGNED",
            Self::OutForDelivery => "OUT_FOR_DELIVERY",
            Self::FailedDelivery => "FAILED_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Who is requesting the transition
///
/// Automated sources (channel sync, provider webhooks) are held to the
/// forward-only ordering; manual operator overrides bypass ordering but are
/// still rejected on closed orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    /// Channel sync or delivery-provider webhook
    Automated,
    /// Operator action
    Manual,
}

/// Transition rejected by the state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The order is in a terminal status and accepts no further writes
    #[error("order is closed (status {current})")]
    ClosedOrder { current: OrderStatus },

    /// The requested status is not ahead of the current one
    #[error("transition {current} -> {requested} is not forward")]
    NotForward {
        current: OrderStatus,
        requested: OrderStatus,
    },

    /// Entering delivered without a delivery timestamp
    #[error("delivered status requires a delivery timestamp")]
    MissingDeliveredTimestamp,
}

impl TransitionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ClosedOrder { .. } => ErrorCode::OrderClosed,
            Self::NotForward { .. } => ErrorCode::InvalidTransition,
            Self::MissingDeliveredTimestamp => ErrorCode::MissingDeliveryTimestamp,
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::with_message(err.error_code(), err.to_string())
    }
}

/// Validate a status transition without applying it
///
/// The rules, in order:
/// 1. Closed orders reject every transition, from every source.
/// 2. A transition to the current status is never "forward"; callers treat
///    it as a stale duplicate and no-op.
/// 3. Manual sources bypass the ordering (the closed-order rule already ran).
/// 4. Automated sources may cancel any open order, may enter
///    `failed_delivery` only from `out_for_delivery`, may leave
///    `failed_delivery` for `assigned`/`out_for_delivery`/`delivered`, and
///    otherwise must move strictly forward on the happy-path ranking.
///    Skipping intermediate states is allowed — a `picked_up` webhook on an
///    order still in `processing` is accepted.
pub fn validate_transition(
    current: OrderStatus,
    requested: OrderStatus,
    source: TransitionSource,
) -> Result<(), TransitionError> {
    if current.is_terminal() {
        return Err(TransitionError::ClosedOrder { current });
    }
    if requested == current {
        return Err(TransitionError::NotForward { current, requested });
    }
    if source == TransitionSource::Manual {
        return Ok(());
    }

    use OrderStatus::*;
    match (current, requested) {
        (_, Cancelled) => Ok(()),
        (OutForDelivery, FailedDelivery) => Ok(()),
        (_, FailedDelivery) => Err(TransitionError::NotForward { current, requested }),
        (FailedDelivery, Assigned | OutForDelivery | Delivered) => Ok(()),
        (FailedDelivery, _) => Err(TransitionError::NotForward { current, requested }),
        _ => {
            // Both on the happy path here; ranks always resolve
            let cur = current.happy_path_rank().unwrap_or(u8::MAX);
            let req = requested.happy_path_rank().unwrap_or(0);
            if req > cur {
                Ok(())
            } else {
                Err(TransitionError::NotForward { current, requested })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;
    use TransitionSource::*;

    #[test]
    fn test_happy_path_forward() {
        let path = [
            Pending,
            Processing,
            ReadyForPickup,
            Assigned,
            OutForDelivery,
            Delivered,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1], Automated).is_ok());
        }
    }

    #[test]
    fn test_skipping_states_allowed() {
        // A picked_up webhook while still processing skips ahead
        assert!(validate_transition(Processing, OutForDelivery, Automated).is_ok());
        assert!(validate_transition(Pending, Delivered, Automated).is_ok());
    }

    #[test]
    fn test_backward_rejected_for_automated() {
        let err = validate_transition(OutForDelivery, Processing, Automated).unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotForward {
                current: OutForDelivery,
                requested: Processing
            }
        );
    }

    #[test]
    fn test_same_status_rejected() {
        assert!(validate_transition(Assigned, Assigned, Automated).is_err());
        assert!(validate_transition(Assigned, Assigned, Manual).is_err());
    }

    #[test]
    fn test_closed_order_rejects_everything() {
        for source in [Automated, Manual] {
            assert_eq!(
                validate_transition(Delivered, Cancelled, source),
                Err(TransitionError::ClosedOrder { current: Delivered })
            );
            assert_eq!(
                validate_transition(Cancelled, Pending, source),
                Err(TransitionError::ClosedOrder { current: Cancelled })
            );
        }
    }

    #[test]
    fn test_cancel_from_any_open_state() {
        for status in [Pending, Processing, ReadyForPickup, Assigned, OutForDelivery, FailedDelivery] {
            assert!(validate_transition(status, Cancelled, Automated).is_ok());
        }
    }

    #[test]
    fn test_failed_delivery_only_from_out_for_delivery() {
        assert!(validate_transition(OutForDelivery, FailedDelivery, Automated).is_ok());
        assert!(validate_transition(Processing, FailedDelivery, Automated).is_err());
        assert!(validate_transition(Assigned, FailedDelivery, Automated).is_err());
    }

    #[test]
    fn test_failed_delivery_retry_paths() {
        assert!(validate_transition(FailedDelivery, Assigned, Automated).is_ok());
        assert!(validate_transition(FailedDelivery, OutForDelivery, Automated).is_ok());
        assert!(validate_transition(FailedDelivery, Delivered, Automated).is_ok());
        assert!(validate_transition(FailedDelivery, Pending, Automated).is_err());
    }

    #[test]
    fn test_manual_bypasses_ordering_but_not_closure() {
        // Operator can pull an order backwards while open
        assert!(validate_transition(OutForDelivery, Processing, Manual).is_ok());
        // But never reopen a closed order
        assert!(validate_transition(Delivered, Processing, Manual).is_err());
    }

    #[test]
    fn test_serde_wire_format() {
        let json = serde_json::to_string(&OutForDelivery).unwrap();
        assert_eq!(json, "\"OUT_FOR_DELIVERY\"");
        let back: OrderStatus = serde_json::from_str("\"READY_FOR_PICKUP\"").unwrap();
        assert_eq!(back, ReadyForPickup);
    }
}
