use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{BrokerError, SinkError};
use crate::port::{BrokerSession, Delivery, LogSink, PersistOutcome};

/// At most one unacknowledged delivery per consumer.
pub const PREFETCH_COUNT: u16 = 1;

/// How a single delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Persistence step ran (written or suppressed); message removed from the queue.
    Acked,
    /// Callback-level failure; message handed back for redelivery.
    Requeued,
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub requeued: u64,
    /// Acked deliveries whose persistence was suppressed.
    pub dropped: u64,
}

/// Drains the queue one message at a time into a sink.
pub struct Consumer {
    sink: Arc<dyn LogSink>,
    queue: String,
    requeue_backoff: Duration,
}

impl Consumer {
    pub fn new(sink: Arc<dyn LogSink>, queue: impl Into<String>) -> Self {
        Self {
            sink,
            queue: queue.into(),
            requeue_backoff: Duration::ZERO,
        }
    }

    /// Pause before handing a failed delivery back, so a message that fails
    /// every time cannot spin the loop.
    #[must_use]
    pub fn with_requeue_backoff(mut self, backoff: Duration) -> Self {
        self.requeue_backoff = backoff;
        self
    }

    /// Consume until `shutdown` fires or the broker ends the stream.
    ///
    /// Cancellation only interrupts the wait for the next delivery. A delivery
    /// that has been received is always processed and settled before the
    /// token is checked again.
    pub async fn run(
        &self,
        session: &dyn BrokerSession,
        shutdown: CancellationToken,
    ) -> Result<ConsumerStats, BrokerError> {
        let mut stream = session.consume(&self.queue, PREFETCH_COUNT).await?;
        let mut stats = ConsumerStats::default();
        info!(queue = %self.queue, prefetch = PREFETCH_COUNT, "Waiting for messages");

        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping consumer");
                    break;
                }
                next = stream.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!("Failed to receive delivery: {e}");
                    return Err(e);
                }
                None => {
                    warn!("Broker closed the delivery stream");
                    return Err(BrokerError::StreamClosed);
                }
            };

            match self.handle_delivery(delivery, &shutdown).await? {
                (Disposition::Acked, dropped) => {
                    stats.acked += 1;
                    if dropped {
                        stats.dropped += 1;
                    }
                }
                (Disposition::Requeued, _) => stats.requeued += 1,
            }
        }

        info!(
            acked = stats.acked,
            requeued = stats.requeued,
            dropped = stats.dropped,
            "Consumer stopped"
        );
        Ok(stats)
    }

    /// Process one delivery and settle it exactly once. Returns the
    /// disposition and whether the record was dropped by the sink.
    pub async fn handle_delivery(
        &self,
        delivery: Box<dyn Delivery>,
        shutdown: &CancellationToken,
    ) -> Result<(Disposition, bool), BrokerError> {
        let tag = delivery.delivery_tag();

        let text = match std::str::from_utf8(delivery.payload()) {
            Ok(text) => text.to_owned(),
            Err(e) => {
                error!(
                    delivery_tag = tag,
                    redelivered = delivery.redelivered(),
                    "Error in callback: payload is not UTF-8: {e}"
                );
                self.pause_before_requeue(shutdown).await;
                delivery.nack_requeue().await?;
                return Ok((Disposition::Requeued, false));
            }
        };

        // Sink failures are acknowledged anyway: the record is dropped
        // rather than redelivered.
        let dropped = match self.sink.persist(&text).await {
            PersistOutcome::Written { .. } => false,
            PersistOutcome::Suppressed(e) => {
                log_suppressed(tag, &e);
                true
            }
        };

        delivery.ack().await?;
        Ok((Disposition::Acked, dropped))
    }

    async fn pause_before_requeue(&self, shutdown: &CancellationToken) {
        if self.requeue_backoff.is_zero() {
            return;
        }
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tokio::time::sleep(self.requeue_backoff) => {}
        }
    }
}

fn log_suppressed(tag: u64, e: &SinkError) {
    match e {
        SinkError::Io { .. } => error!(delivery_tag = tag, "Error processing log, record dropped: {e}"),
        SinkError::Parse(_) | SinkError::NotAnObject => {
            warn!(delivery_tag = tag, "Error processing log, malformed record dropped: {e}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FileSink;
    use crate::port::BrokerClient;
    use crate::test_support::InMemoryBroker;
    use tempfile::TempDir;

    async fn session_with(broker: &InMemoryBroker, payloads: &[&[u8]]) -> Box<dyn BrokerSession> {
        let session = broker.client().connect().await.unwrap();
        session.declare_durable_queue("logs").await.unwrap();
        for payload in payloads {
            session.publish_persistent("logs", payload).await.unwrap();
        }
        session
    }

    async fn next_delivery(session: &dyn BrokerSession) -> Box<dyn Delivery> {
        let mut stream = session.consume("logs", 1).await.unwrap();
        stream.next_delivery().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_well_formed_message_is_written_and_acked() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.txt");
        let broker = InMemoryBroker::new();
        let session =
            session_with(&broker, &[br#"{"timestamp":"t","level":"INFO","message":"ok"}"#]).await;
        let consumer = Consumer::new(Arc::new(FileSink::new(&path)), "logs");

        let delivery = next_delivery(session.as_ref()).await;
        let result = consumer
            .handle_delivery(delivery, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, (Disposition::Acked, false));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[t] [INFO] ok\n");
        assert_eq!(broker.acked_count("logs"), 1);
        assert_eq!(broker.unacked_count("logs"), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_acked_and_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.txt");
        let broker = InMemoryBroker::new();
        let session = session_with(&broker, &[b"{not json"]).await;
        let consumer = Consumer::new(Arc::new(FileSink::new(&path)), "logs");

        let delivery = next_delivery(session.as_ref()).await;
        let result = consumer
            .handle_delivery(delivery, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, (Disposition::Acked, true));
        assert!(!path.exists());
        assert!(broker.ready_messages("logs").is_empty());
        assert_eq!(broker.requeued_count("logs"), 0);
    }

    #[tokio::test]
    async fn test_sink_io_failure_is_acked() {
        let temp_dir = TempDir::new().unwrap();
        let broker = InMemoryBroker::new();
        let session = session_with(&broker, &[br#"{"message":"lost"}"#]).await;
        // A directory as the sink path makes every append fail.
        let consumer = Consumer::new(Arc::new(FileSink::new(temp_dir.path())), "logs");

        let delivery = next_delivery(session.as_ref()).await;
        let result = consumer
            .handle_delivery(delivery, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, (Disposition::Acked, true));
        assert_eq!(broker.acked_count("logs"), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_requeued() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.txt");
        let broker = InMemoryBroker::new();
        let session = session_with(&broker, &[&[0xff, 0xfe, 0xfd]]).await;
        let consumer = Consumer::new(Arc::new(FileSink::new(&path)), "logs");

        let delivery = next_delivery(session.as_ref()).await;
        let result = consumer
            .handle_delivery(delivery, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, (Disposition::Requeued, false));
        assert_eq!(broker.ready_messages("logs"), vec![vec![0xff, 0xfe, 0xfd]]);
        assert_eq!(broker.requeued_count("logs"), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let temp_dir = TempDir::new().unwrap();
        let broker = InMemoryBroker::new();
        let session = session_with(&broker, &[]).await;
        let consumer = Consumer::new(
            Arc::new(FileSink::new(temp_dir.path().join("out.txt"))),
            "logs",
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = consumer.run(session.as_ref(), shutdown).await.unwrap();

        assert_eq!(stats, ConsumerStats::default());
    }

    #[tokio::test]
    async fn test_run_requests_prefetch_of_one() {
        let temp_dir = TempDir::new().unwrap();
        let broker = InMemoryBroker::new();
        let session = session_with(&broker, &[]).await;
        let consumer = Consumer::new(
            Arc::new(FileSink::new(temp_dir.path().join("out.txt"))),
            "logs",
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        consumer.run(session.as_ref(), shutdown).await.unwrap();

        assert_eq!(broker.requested_prefetch("logs"), Some(1));
    }

    #[tokio::test]
    async fn test_run_reports_stream_closed_by_broker() {
        let temp_dir = TempDir::new().unwrap();
        let broker = InMemoryBroker::new();
        let session = session_with(&broker, &[]).await;
        let consumer = Consumer::new(
            Arc::new(FileSink::new(temp_dir.path().join("out.txt"))),
            "logs",
        );
        broker.cancel_consumers();

        let result = consumer.run(session.as_ref(), CancellationToken::new()).await;

        assert!(matches!(result, Err(BrokerError::StreamClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_backoff_is_cut_short_by_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let broker = InMemoryBroker::new();
        let session = session_with(&broker, &[&[0xc3, 0x28]]).await;
        let consumer = Consumer::new(
            Arc::new(FileSink::new(temp_dir.path().join("out.txt"))),
            "logs",
        )
        .with_requeue_backoff(Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let delivery = next_delivery(session.as_ref()).await;
        let started = tokio::time::Instant::now();
        let result = consumer.handle_delivery(delivery, &shutdown).await.unwrap();

        assert_eq!(result.0, Disposition::Requeued);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
