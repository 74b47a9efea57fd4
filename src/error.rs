use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error returned by the producer and consumer entry points.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind to address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: BrokerError,
    },
}

/// Failures reported by a broker client. Adapters flatten their native
/// error types into the message strings.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("queue declaration failed for '{queue}': {reason}")]
    Declare { queue: String, reason: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("broker rejected the publication")]
    NotConfirmed,

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),

    #[error("delivery stream closed by broker")]
    StreamClosed,

    #[error("failed to close connection: {0}")]
    Close(String),
}

/// Errors surfaced by `Publisher::publish`.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Content-Type must be application/json")]
    NotJson,

    #[error("Malformed JSON body: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("Log record must be a JSON object")]
    NotAnObject,

    #[error("Failed to serialize log record: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl PublishError {
    /// Whether the failure was caused by the request rather than the broker.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotJson | Self::MalformedJson(_) | Self::NotAnObject
        )
    }
}

/// Failures inside the sink writer. These never cross the consumer's
/// acknowledgement boundary; see `PersistOutcome`.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid JSON payload: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
