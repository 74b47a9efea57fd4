use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{LogRecord, RecordParseError};
use crate::error::PublishError;
use crate::service::connector::BrokerConnector;

/// What the producer reports back for an accepted record.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    /// The timestamp carried by the published record, injected or supplied.
    pub timestamp: Value,
}

/// Publishes log records as persistent messages, one connection per call.
#[derive(Clone)]
pub struct Publisher {
    connector: BrokerConnector,
}

impl Publisher {
    /// `connector` should carry a single-attempt policy; a request must not
    /// sit in a retry loop.
    pub fn new(connector: BrokerConnector) -> Self {
        Self { connector }
    }

    pub async fn publish(
        &self,
        raw_body: &[u8],
        content_type_is_json: bool,
    ) -> Result<PublishReceipt, PublishError> {
        if !content_type_is_json {
            return Err(PublishError::NotJson);
        }

        let mut record = LogRecord::from_slice(raw_body).map_err(|e| match e {
            RecordParseError::Json(source) => PublishError::MalformedJson(source),
            RecordParseError::NotAnObject => PublishError::NotAnObject,
        })?;
        let timestamp = record.ensure_timestamp(Utc::now()).clone();
        let payload = record.to_bytes().map_err(PublishError::Serialize)?;

        let session = self.connector.connect().await.into_result()?;
        let published = session
            .publish_persistent(self.connector.queue(), &payload)
            .await;
        let closed = session.close().await;

        published?;
        if let Err(e) = closed {
            warn!("Failed to close broker connection after publish: {e}");
        }

        debug!(
            queue = self.connector.queue(),
            bytes = payload.len(),
            "Published log record"
        );
        Ok(PublishReceipt { timestamp })
    }
}
