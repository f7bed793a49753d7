#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use config::AppConfig;
pub use error::{DispatchStage, ForwarderError, ForwarderResult, TransportError};
pub use settings::Settings;
pub use types::{Message, MessageKind};
