use crate::adapter::{AmqpClient, SysinfoProbe};
use crate::config::Settings;
use crate::port::BrokerClient;
use crate::reliability::RetryPolicy;
use crate::service::{BrokerConnector, HealthAggregator, Publisher};
use std::sync::Arc;

/// Shared producer state holding the publisher and the health aggregator.
pub struct AppState {
    pub publisher: Arc<Publisher>,
    pub health: Arc<HealthAggregator>,
}

impl AppState {
    /// Wire the producer's components from configuration settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let client: Arc<dyn BrokerClient> =
            Arc::new(AmqpClient::new(&settings.broker, "log-producer"));
        let probe_client: Arc<dyn BrokerClient> = Arc::new(
            AmqpClient::new(&settings.broker, "log-producer-health")
                .with_connect_timeout(settings.health_probe_timeout),
        );

        Self::with_components(
            client,
            probe_client,
            Arc::new(SysinfoProbe::new(&settings.health_disk_path)),
            settings,
        )
    }

    /// Same wiring over arbitrary broker and system adapters.
    pub fn with_components(
        client: Arc<dyn BrokerClient>,
        probe_client: Arc<dyn BrokerClient>,
        probe: Arc<dyn crate::port::SystemProbe>,
        settings: &Settings,
    ) -> Self {
        let connector = BrokerConnector::new(
            client,
            settings.broker.queue.clone(),
            RetryPolicy::single_attempt(),
        );

        Self {
            publisher: Arc::new(Publisher::new(connector)),
            health: Arc::new(HealthAggregator::new(
                probe_client,
                probe,
                settings.broker.address(),
                settings.health_probe_timeout,
            )),
        }
    }
}
