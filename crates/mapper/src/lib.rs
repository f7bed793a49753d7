//! Message mapping for the KISSmetrics tracking API: payload cleaning,
//! per-variant mapping rules, and the multi-call plan for completed orders.
//!
//! # Modules
//!
//! - [`clean`]: Flattens nested property bags into destination scalars
//! - [`mapper`]: One mapping function per message variant
//! - [`order`]: Order-completed event plus per-product payloads
//! - [`pii`]: Conditional IP address / user agent attachment
//! - [`payload`]: Flat wire payload and reserved field names
//! - [`plan`]: Mapper output and the calls it expands to

#![warn(clippy::unwrap_used)]

pub mod clean;
pub mod mapper;
pub mod order;
pub mod payload;
pub mod pii;
pub mod plan;

pub use clean::clean;
pub use mapper::map;
pub use payload::{Payload, PayloadValue};
pub use plan::{Call, Endpoint, IdentifyPayloads, MappedMessage, OrderPlan};
