pub mod router;
pub mod server;
pub mod state;
pub mod tracing;

use std::sync::Arc;

use crate::adapter::{AmqpClient, FileSink};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::service::{BrokerConnector, ConnectOutcome, Consumer};
use ::tracing::{error, info, warn};
use tokio_util::sync::CancellationToken;

/// Producer entry point: HTTP ingest plus health endpoint.
pub async fn run_producer() -> Result<(), PipelineError> {
    // Handle healthcheck subcommand (for Docker healthcheck in distroless image)
    if std::env::args().nth(1).as_deref() == Some("healthcheck") {
        let port = Settings::from_env()?.http_port;
        match crate::healthcheck_with_port(port).await {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1)
            }
        }
    }

    tracing::init_tracing("log-producer");

    let settings = Settings::from_env()?;
    info!(
        broker = %settings.broker.address(),
        queue = %settings.broker.queue,
        port = settings.http_port,
        "Loaded producer settings"
    );

    let app_state = state::AppState::from_settings(&settings);
    let app = router::producer_router(app_state.publisher, app_state.health);

    server::serve(app, settings.http_port, CancellationToken::new()).await
}

/// Consumer entry point: connect under the startup retry budget, then drain
/// the queue into the sink file until a shutdown signal arrives.
pub async fn run_consumer() -> Result<(), PipelineError> {
    tracing::init_tracing("log-consumer");

    let settings = Settings::from_env()?;
    info!(
        broker = %settings.broker.address(),
        queue = %settings.broker.queue,
        log_file = %settings.log_file.display(),
        "Loaded consumer settings"
    );

    let client = Arc::new(AmqpClient::new(&settings.broker, "log-consumer"));
    let connector = BrokerConnector::new(
        client,
        settings.broker.queue.clone(),
        settings.startup_retry.clone(),
    );

    let session = match connector.connect().await {
        ConnectOutcome::Connected(session) => session,
        exhausted @ ConnectOutcome::RetriesExhausted { .. } => {
            error!("Failed to connect to message broker, giving up");
            return exhausted.into_pipeline_result().map(|_| ());
        }
    };

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    let signal_task = tokio::spawn(async move {
        server::shutdown_signal().await;
        signal_token.cancel();
    });

    let sink = Arc::new(FileSink::new(settings.log_file.clone()));
    let consumer = Consumer::new(sink, settings.broker.queue.clone())
        .with_requeue_backoff(settings.requeue_backoff);
    let result = consumer.run(session.as_ref(), shutdown_token).await;
    signal_task.abort();

    if let Err(e) = session.close().await {
        warn!("Failed to close broker connection: {e}");
    }

    match result {
        Ok(stats) => {
            info!(
                acked = stats.acked,
                requeued = stats.requeued,
                dropped = stats.dropped,
                "Consumer shutdown complete"
            );
            Ok(())
        }
        Err(e) => {
            error!("Consumer stopped: {e}");
            Err(e.into())
        }
    }
}
