use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::reliability::RetryPolicy;

const DEFAULT_BROKER_HOST: &str = "localhost";
const DEFAULT_BROKER_PORT: u16 = 5672;
const DEFAULT_QUEUE: &str = "logs";
const DEFAULT_BROKER_USER: &str = "guest";
const DEFAULT_BROKER_PASSWORD: &str = "guest";
const DEFAULT_LOG_FILE: &str = "/logs/processed_logs.txt";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_CONNECT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_CONNECT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_DISK_PATH: &str = "/";
const DEFAULT_REQUEUE_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to read {name}: {source}")]
    SecretFile {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Validation(String),
}

/// Connection parameters for the message broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub queue: String,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl BrokerSettings {
    /// `host:port`, as reported by the health endpoint.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Process-wide settings, read once at startup and passed to each component.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    /// Sink file the consumer appends to.
    pub log_file: PathBuf,
    /// Producer HTTP listen port.
    pub http_port: u16,
    /// Consumer startup connection policy.
    pub startup_retry: RetryPolicy,
    pub health_probe_timeout: Duration,
    pub health_disk_path: PathBuf,
    pub requeue_backoff: Duration,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let broker = BrokerSettings {
            host: lookup("RABBITMQ_HOST").unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string()),
            port: parse_or(&lookup, "RABBITMQ_PORT", DEFAULT_BROKER_PORT)?,
            user: secret_or(&lookup, "RABBITMQ_USER", DEFAULT_BROKER_USER)?,
            password: secret_or(&lookup, "RABBITMQ_PASSWORD", DEFAULT_BROKER_PASSWORD)?,
            queue: lookup("RABBITMQ_QUEUE").unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            connect_timeout: Duration::from_secs(parse_or(
                &lookup,
                "BROKER_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
        };

        let startup_retry = RetryPolicy::fixed(
            parse_or(
                &lookup,
                "BROKER_CONNECT_MAX_ATTEMPTS",
                DEFAULT_CONNECT_MAX_ATTEMPTS,
            )?,
            Duration::from_secs(parse_or(
                &lookup,
                "BROKER_CONNECT_RETRY_DELAY_SECS",
                DEFAULT_CONNECT_RETRY_DELAY_SECS,
            )?),
        );

        let settings = Settings {
            broker,
            log_file: PathBuf::from(
                lookup("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
            ),
            http_port: parse_or(&lookup, "PORT", DEFAULT_HTTP_PORT)?,
            startup_retry,
            health_probe_timeout: Duration::from_millis(parse_or(
                &lookup,
                "HEALTH_PROBE_TIMEOUT_MS",
                DEFAULT_PROBE_TIMEOUT_MS,
            )?),
            health_disk_path: PathBuf::from(
                lookup("HEALTH_DISK_PATH").unwrap_or_else(|| DEFAULT_DISK_PATH.to_string()),
            ),
            requeue_backoff: Duration::from_millis(parse_or(
                &lookup,
                "CONSUMER_REQUEUE_BACKOFF_MS",
                DEFAULT_REQUEUE_BACKOFF_MS,
            )?),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings and returns an error if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_host(&self.broker.host)?;
        validate_port(self.broker.port)?;
        validate_port(self.http_port)?;
        if self.broker.queue.trim().is_empty() {
            return Err(ConfigError::Validation("Queue name cannot be empty".into()));
        }
        validate_timeout("BROKER_CONNECT_TIMEOUT_SECS", self.broker.connect_timeout)?;
        validate_timeout("HEALTH_PROBE_TIMEOUT_MS", self.health_probe_timeout)?;
        if self.startup_retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "Connection attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Validates that the host is not empty or whitespace-only.
fn validate_host(host: &str) -> Result<(), ConfigError> {
    if host.trim().is_empty() {
        return Err(ConfigError::Validation("Host cannot be empty".into()));
    }
    Ok(())
}

/// A zero timeout fails every connection attempt before it starts.
fn validate_timeout(name: &str, timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::Validation(format!("{name} must be greater than 0")));
    }
    Ok(())
}

/// Validates that the port is in valid range (1-65535).
fn validate_port(port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::Validation("Port cannot be 0".into()));
    }
    Ok(())
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

/// Read a value with support for the `_FILE` suffix (Docker Secrets).
fn secret_or<F>(lookup: &F, name: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let file_env = format!("{name}_FILE");
    if let Some(file_path) = lookup(&file_env) {
        return fs::read_to_string(&file_path)
            .map(|content| content.trim().to_string())
            .map_err(|source| ConfigError::SecretFile {
                name: file_env,
                source,
            });
    }

    Ok(lookup(name).unwrap_or_else(|| default.to_string()))
}
