//! Unified error codes for the delivery platform
//!
//! Error codes are shared between the dispatch server, the HTTP layer, and
//! operator tooling. Codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Channel / sync errors
//! - 2xxx: Order errors
//! - 3xxx: Dispatch / delivery-provider errors
//! - 9xxx: System errors

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed (malformed upstream payload, bad draft)
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,

    // ==================== 1xxx: Channel / Sync ====================
    /// Channel not found or not configured
    ChannelNotFound = 1001,
    /// Channel credentials rejected by the upstream API
    ChannelAuthFailed = 1002,
    /// Upstream channel API unavailable
    UpstreamUnavailable = 1003,
    /// Channel sync exceeded its overall deadline
    SyncDeadlineExceeded = 1004,
    /// Webhook registration with the channel failed (best-effort)
    WebhookRegistrationFailed = 1005,

    // ==================== 2xxx: Order ====================
    /// Order not found
    OrderNotFound = 2001,
    /// Duplicate natural key (channel_id, external_order_id)
    DuplicateOrderKey = 2002,
    /// Status transition rejected by the state machine
    InvalidTransition = 2003,
    /// Order is closed (delivered or cancelled) and accepts no mutations
    OrderClosed = 2004,
    /// Entering delivered requires a delivery timestamp
    MissingDeliveryTimestamp = 2005,
    /// Order already included in an invoice
    AlreadyInvoiced = 2006,

    // ==================== 3xxx: Dispatch / Provider ====================
    /// Delivery provider API unavailable
    ProviderUnavailable = 3001,
    /// Delivery provider is throttling requests
    RateLimited = 3002,
    /// Remote job created but local persist failed; needs manual review
    OrphanedRemoteJob = 3003,
    /// Order already assigned to a different carrier
    CarrierConflict = 3004,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Serialization error
    SerializationError = 9003,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Default human-readable message for this code
    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Unknown => "Unknown error",
            Self::ValidationFailed => "Validation failed",
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::InvalidRequest => "Invalid request",

            Self::ChannelNotFound => "Channel not found",
            Self::ChannelAuthFailed => "Channel authentication failed",
            Self::UpstreamUnavailable => "Upstream channel API unavailable",
            Self::SyncDeadlineExceeded => "Channel sync deadline exceeded",
            Self::WebhookRegistrationFailed => "Webhook registration failed",

            Self::OrderNotFound => "Order not found",
            Self::DuplicateOrderKey => "Order with this external key already exists",
            Self::InvalidTransition => "Invalid status transition",
            Self::OrderClosed => "Order is closed and accepts no further changes",
            Self::MissingDeliveryTimestamp => "Delivered status requires a delivery timestamp",
            Self::AlreadyInvoiced => "Order already invoiced",

            Self::ProviderUnavailable => "Delivery provider unavailable",
            Self::RateLimited => "Delivery provider rate limit exceeded",
            Self::OrphanedRemoteJob => "Remote delivery job orphaned; manual review required",
            Self::CarrierConflict => "Order already assigned to a different carrier",

            Self::InternalError => "Internal server error",
            Self::DatabaseError => "Database error",
            Self::SerializationError => "Serialization error",
        }
    }

    /// HTTP status for this error code
    ///
    /// This is what the webhook route returns to the delivery provider:
    /// retryable codes map to 429/503 so the provider redelivers, while
    /// non-retryable codes are acknowledged with a 4xx and logged.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Success => StatusCode::OK,
            Self::ValidationFailed | Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::ChannelNotFound | Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists
            | Self::DuplicateOrderKey
            | Self::InvalidTransition
            | Self::OrderClosed
            | Self::AlreadyInvoiced
            | Self::CarrierConflict => StatusCode::CONFLICT,
            Self::MissingDeliveryTimestamp => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ChannelAuthFailed => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable | Self::ProviderUnavailable | Self::DatabaseError => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::SyncDeadlineExceeded
            | Self::WebhookRegistrationFailed
            | Self::OrphanedRemoteJob
            | Self::InternalError
            | Self::SerializationError
            | Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a caller (scheduler, webhook sender) should retry later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable
                | Self::ProviderUnavailable
                | Self::RateLimited
                | Self::DatabaseError
        )
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error returned when converting an unknown u16 into an [`ErrorCode`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid error code: {0}")]
pub struct InvalidErrorCode(pub u16);

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Success,
            1 => Self::Unknown,
            2 => Self::ValidationFailed,
            3 => Self::NotFound,
            4 => Self::AlreadyExists,
            5 => Self::InvalidRequest,
            1001 => Self::ChannelNotFound,
            1002 => Self::ChannelAuthFailed,
            1003 => Self::UpstreamUnavailable,
            1004 => Self::SyncDeadlineExceeded,
            1005 => Self::WebhookRegistrationFailed,
            2001 => Self::OrderNotFound,
            2002 => Self::DuplicateOrderKey,
            2003 => Self::InvalidTransition,
            2004 => Self::OrderClosed,
            2005 => Self::MissingDeliveryTimestamp,
            2006 => Self::AlreadyInvoiced,
            3001 => Self::ProviderUnavailable,
            3002 => Self::RateLimited,
            3003 => Self::OrphanedRemoteJob,
            3004 => Self::CarrierConflict,
            9001 => Self::InternalError,
            9002 => Self::DatabaseError,
            9003 => Self::SerializationError,
            other => return Err(InvalidErrorCode(other)),
        };
        Ok(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in [
            ErrorCode::Success,
            ErrorCode::ValidationFailed,
            ErrorCode::ChannelAuthFailed,
            ErrorCode::InvalidTransition,
            ErrorCode::RateLimited,
            ErrorCode::DatabaseError,
        ] {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert_eq!(ErrorCode::try_from(4242), Err(InvalidErrorCode(4242)));
    }

    #[test]
    fn test_retryable_codes_map_to_retryable_statuses() {
        assert_eq!(
            ErrorCode::RateLimited.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::ProviderUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(!ErrorCode::ValidationFailed.is_retryable());
    }

    #[test]
    fn test_display_format() {
        assert_eq!(ErrorCode::InvalidTransition.to_string(), "E2003");
        assert_eq!(ErrorCode::Success.to_string(), "E0000");
    }
}
