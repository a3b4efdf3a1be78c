//! Order domain: canonical record, drafts, and the status state machine

mod status;
mod types;

pub use status::{validate_transition, OrderStatus, TransitionError, TransitionSource};
pub use types::{
    DeliveryTimestamps, DriverInfo, GeoPoint, NaturalKey, Order, OrderDraft, ProofOfDelivery,
};
