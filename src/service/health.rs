use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tracing::{info, warn};

use crate::domain::{BrokerHealth, BrokerLinkStatus, HealthSnapshot, HealthStatus};
use crate::error::BrokerError;
use crate::port::{BrokerClient, SystemProbe};

/// Reported service name.
pub const SERVICE_NAME: &str = "log-producer";

/// Computes a fresh health snapshot on every call.
pub struct HealthAggregator {
    client: Arc<dyn BrokerClient>,
    probe: Arc<dyn SystemProbe>,
    broker_address: String,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        probe: Arc<dyn SystemProbe>,
        broker_address: impl Into<String>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            probe,
            broker_address: broker_address.into(),
            probe_timeout,
        }
    }

    pub async fn check(&self) -> (HealthSnapshot, StatusCode) {
        let (broker, sample) = tokio::join!(self.probe_broker(), self.probe.sample());

        let snapshot = HealthSnapshot::assemble(SERVICE_NAME, broker, sample);
        let status_code = status_code_for(snapshot.status);
        info!(status = ?snapshot.status, "Health check requested");
        (snapshot, status_code)
    }

    /// One attempt under a short timeout; the connection is closed straight away.
    async fn probe_broker(&self) -> BrokerHealth {
        let attempt = tokio::time::timeout(self.probe_timeout, self.client.connect()).await;
        let result = match attempt {
            Ok(Ok(session)) => {
                if let Err(e) = session.close().await {
                    warn!("Failed to close health probe connection: {e}");
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BrokerError::Timeout(self.probe_timeout)),
        };

        match result {
            Ok(()) => BrokerHealth {
                status: BrokerLinkStatus::Connected,
                host: self.broker_address.clone(),
                message: "Connected".to_string(),
            },
            Err(e) => BrokerHealth {
                status: BrokerLinkStatus::Disconnected,
                host: self.broker_address.clone(),
                message: e.to_string(),
            },
        }
    }
}

/// Only a degraded verdict fails the HTTP check.
#[must_use]
pub fn status_code_for(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Warning => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryBroker, StaticProbe};

    fn aggregator(broker: &InMemoryBroker, probe: StaticProbe) -> HealthAggregator {
        HealthAggregator::new(
            broker.client(),
            Arc::new(probe),
            "localhost:5672",
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_degraded_503() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);

        let (snapshot, code) = aggregator(&broker, StaticProbe::with_pressure(10.0, 10.0))
            .check()
            .await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.rabbitmq.status, BrokerLinkStatus::Disconnected);
        assert_eq!(snapshot.rabbitmq.message, "connection failed: connection refused");
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_reachable_broker_with_headroom_is_healthy() {
        let broker = InMemoryBroker::new();

        let (snapshot, code) = aggregator(&broker, StaticProbe::with_pressure(40.0, 90.0))
            .check()
            .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(snapshot.rabbitmq.message, "Connected");
        assert_eq!(snapshot.rabbitmq.host, "localhost:5672");
        assert_eq!(broker.open_sessions(), 0);
        // The probe never declares anything.
        assert_eq!(broker.queue_durability("logs"), None);
    }

    #[tokio::test]
    async fn test_resource_pressure_is_warning_200() {
        let broker = InMemoryBroker::new();

        let (snapshot, code) = aggregator(&broker, StaticProbe::with_pressure(95.5, 10.0))
            .check()
            .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(snapshot.status, HealthStatus::Warning);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code_for(HealthStatus::Healthy), StatusCode::OK);
        assert_eq!(status_code_for(HealthStatus::Warning), StatusCode::OK);
        assert_eq!(
            status_code_for(HealthStatus::Degraded),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
