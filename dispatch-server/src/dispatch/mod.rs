//! Delivery dispatch gateway

mod depot;
mod gateway;
mod provider;
mod rate_limit;

pub use depot::DepotCache;
pub use gateway::{BulkAssignReport, DeliveryJobRef, DispatchError, DispatchGateway};
pub use provider::{DeliveryProvider, HttpDeliveryProvider, ProviderError};
pub use rate_limit::RateLimiter;
