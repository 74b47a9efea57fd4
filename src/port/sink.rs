use crate::error::SinkError;
use futures::future::BoxFuture;

/// Result of a persistence attempt. A failure is recorded and handed back as
/// a value; the caller decides what it means for the message.
#[must_use]
#[derive(Debug)]
pub enum PersistOutcome {
    Written { line: String },
    Suppressed(SinkError),
}

impl PersistOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Destination for consumed log records.
pub trait LogSink: Send + Sync {
    /// Persist one JSON-encoded record. Never fails past this boundary.
    fn persist<'a>(&'a self, json_text: &'a str) -> BoxFuture<'a, PersistOutcome>;
}
