use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{BrokerError, PipelineError};
use crate::port::{BrokerClient, BrokerSession};
use crate::reliability::RetryPolicy;

/// Result of a bounded connection loop. Exhaustion is reported, not acted on:
/// whether it ends the process is up to the caller.
pub enum ConnectOutcome {
    Connected(Box<dyn BrokerSession>),
    RetriesExhausted { attempts: u32, last_error: BrokerError },
}

impl ConnectOutcome {
    /// Collapse into a `Result`, keeping only the last error.
    pub fn into_result(self) -> Result<Box<dyn BrokerSession>, BrokerError> {
        match self {
            Self::Connected(session) => Ok(session),
            Self::RetriesExhausted { last_error, .. } => Err(last_error),
        }
    }

    pub fn into_pipeline_result(self) -> Result<Box<dyn BrokerSession>, PipelineError> {
        match self {
            Self::Connected(session) => Ok(session),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => Err(PipelineError::RetriesExhausted {
                attempts,
                last_error,
            }),
        }
    }
}

/// Book-keeping for one `connect()` call.
struct ConnectionState {
    attempt: u32,
    last_error: Option<BrokerError>,
}

/// Connects to the broker under a retry budget and declares the durable queue.
#[derive(Clone)]
pub struct BrokerConnector {
    client: Arc<dyn BrokerClient>,
    queue: String,
    policy: RetryPolicy,
}

impl BrokerConnector {
    pub fn new(client: Arc<dyn BrokerClient>, queue: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            queue: queue.into(),
            policy,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn connect(&self) -> ConnectOutcome {
        let mut state = ConnectionState {
            attempt: 0,
            last_error: None,
        };
        let max_attempts = self.policy.max_attempts.max(1);

        while state.attempt < max_attempts {
            state.attempt += 1;
            info!(
                attempt = state.attempt,
                max_attempts,
                queue = %self.queue,
                "Connecting to message broker"
            );

            match self.try_once().await {
                Ok(session) => {
                    info!(attempt = state.attempt, "Connected to message broker");
                    return ConnectOutcome::Connected(session);
                }
                Err(e) => {
                    warn!(
                        attempt = state.attempt,
                        max_attempts,
                        error = %e,
                        "Broker connection attempt failed"
                    );
                    state.last_error = Some(e);
                }
            }

            if self.policy.should_retry(state.attempt) {
                let delay = self.policy.delay;
                info!("Retrying broker connection in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }

        ConnectOutcome::RetriesExhausted {
            attempts: state.attempt,
            last_error: state
                .last_error
                .unwrap_or_else(|| BrokerError::Connect("no attempt made".into())),
        }
    }

    /// Connect and declare. A failed declaration closes the session and
    /// counts as a failed attempt.
    async fn try_once(&self) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let session = self.client.connect().await?;
        let declared = session.declare_durable_queue(&self.queue).await;
        if let Err(e) = declared {
            if let Err(close_err) = session.close().await {
                warn!("Failed to close session after declare error: {close_err}");
            }
            return Err(e);
        }
        Ok(session)
    }
}
