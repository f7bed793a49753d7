//! Destination settings and integration metadata.
//!
//! [`Settings`] is an immutable value handed to every mapping call. It is
//! validated up front so a missing API key surfaces as a configuration error
//! before any payload is built.

use serde::{Deserialize, Serialize};

use crate::config::SettingsConfig;
use crate::error::{ForwarderError, ForwarderResult};

/// Display name of the destination.
pub const INTEGRATION_NAME: &str = "KISSmetrics";

/// Tracking API base endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://trk.kissmetrics.com";

/// Channels the destination accepts messages from.
pub const CHANNELS: &[&str] = &["server"];

/// Extra attempts made by the transport after a retryable failure.
pub const DEFAULT_RETRIES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub api_key: String,
    #[serde(default)]
    pub prefix_properties: bool,
}

impl Settings {
    /// Build validated settings.
    pub fn new(api_key: impl Into<String>, prefix_properties: bool) -> ForwarderResult<Self> {
        let settings = Self {
            api_key: api_key.into(),
            prefix_properties,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_config(config: &SettingsConfig) -> ForwarderResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ForwarderError::Config("settings.apiKey is required".into()))?;
        Self::new(api_key, config.prefix_properties)
    }

    /// Reject settings the destination cannot authenticate with.
    pub fn validate(&self) -> ForwarderResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ForwarderError::Config(
                "settings.apiKey must not be empty".into(),
            ));
        }
        Ok(())
    }
}
