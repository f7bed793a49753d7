use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type ForwarderResult<T> = Result<T, ForwarderError>;

#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Dispatch error during {stage}: {source}")]
    Dispatch {
        stage: DispatchStage,
        #[source]
        source: TransportError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ForwarderError {
    /// Stage of the outbound call that failed, for dispatch errors.
    pub fn stage(&self) -> Option<DispatchStage> {
        match self {
            ForwarderError::Dispatch { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Failure reported by the outbound HTTP collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("destination responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Whether another attempt could succeed (connection failures and 5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Request(_) => true,
            TransportError::InvalidEndpoint(_) => false,
        }
    }
}

/// The outbound call a dispatch error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "index")]
pub enum DispatchStage {
    Identify,
    AliasMerge,
    Group,
    Track,
    Page,
    Screen,
    Alias,
    OrderEvent,
    OrderProduct(usize),
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStage::Identify => f.write_str("identify"),
            DispatchStage::AliasMerge => f.write_str("identify alias"),
            DispatchStage::Group => f.write_str("group"),
            DispatchStage::Track => f.write_str("track"),
            DispatchStage::Page => f.write_str("page"),
            DispatchStage::Screen => f.write_str("screen"),
            DispatchStage::Alias => f.write_str("alias"),
            DispatchStage::OrderEvent => f.write_str("order event"),
            DispatchStage::OrderProduct(index) => write!(f, "order product {index}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_names_stage() {
        let err = ForwarderError::Dispatch {
            stage: DispatchStage::OrderProduct(2),
            source: TransportError::Status {
                status: 503,
                body: "unavailable".into(),
            },
        };
        assert_eq!(err.stage(), Some(DispatchStage::OrderProduct(2)));
        assert_eq!(
            err.to_string(),
            "Dispatch error during order product 2: destination responded with status 503: unavailable"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Request("timed out".into()).is_retryable());
        assert!(TransportError::Status { status: 502, body: String::new() }.is_retryable());
        assert!(!TransportError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!TransportError::InvalidEndpoint("nope".into()).is_retryable());
    }

    #[test]
    fn test_non_dispatch_errors_have_no_stage() {
        assert_eq!(ForwarderError::Config("missing apiKey".into()).stage(), None);
        assert_eq!(ForwarderError::Mapping("bad products".into()).stage(), None);
    }
}
