//! Delivery of mapped messages to the KISSmetrics tracking API.
//!
//! # Modules
//!
//! - [`transport`]: HTTP transport with GET/POST selection and retries
//! - [`dispatcher`]: Per-variant call ordering and order fan-out

#![warn(clippy::unwrap_used)]

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{CallOutcome, DispatchReport, Dispatcher};
pub use transport::{HttpTransport, RecordingTransport, Transport, TransportResponse};
