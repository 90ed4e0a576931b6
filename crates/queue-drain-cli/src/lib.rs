//! # Queue-Drain CLI
//!
//! Command-line interface that empties Service Bus topic subscriptions.
//!
//! This module provides:
//! - Argument parsing
//! - Layered settings (file, environment, flags)
//! - Logging initialization
//! - Wiring of the Azure Service Bus transport, the drain coordinator and the
//!   Prometheus telemetry sink
//!
//! Exit codes are defined by [`CliError::exit_code`].

use clap::Parser;
use queue_drain_core::{
    plan_targets, DrainConfig, DrainCoordinator, DrainError, DrainSummary, QueueSelector,
};
use queue_runtime::{AzureServiceBusConfig, AzureServiceBusConnector, QueueConnector, QueueError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

pub use metrics::PrometheusTelemetry;

/// Prefix of environment variables read as settings, e.g. `QUEUE_DRAIN__TOPIC`
pub const ENV_PREFIX: &str = "QUEUE_DRAIN";

/// Default time workers get to release their resources after a stop request
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 30;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Drain CLI - Empty Service Bus topic subscriptions
#[derive(Parser, Debug)]
#[command(name = "queue-drain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drain Service Bus topic subscriptions until they are empty")]
#[command(
    long_about = "Receives and deletes messages from the main and/or dead letter queues of topic \
                  subscriptions, concurrently, until each queue stays empty for the configured \
                  number of receive attempts"
)]
pub struct Cli {
    /// Configuration file path (TOML or JSON)
    #[arg(short, long, env = "QUEUE_DRAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Service Bus connection string
    #[arg(long, env = "SERVICEBUS_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Topic whose subscriptions are drained
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Subscription to drain; repeat the flag or separate names with commas
    #[arg(short, long = "subscription", value_delimiter = ',')]
    pub subscriptions: Vec<String>,

    /// Queues to drain: main, dead-letter or all
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Base receive wait in seconds; the wait doubles with every empty receive
    #[arg(long, allow_negative_numbers = true)]
    pub timeout_seconds: Option<i64>,

    /// Maximum number of messages per receive call
    #[arg(long, allow_negative_numbers = true)]
    pub batch_size: Option<i64>,

    /// Consecutive empty receives before a queue counts as drained
    #[arg(long, allow_negative_numbers = true)]
    pub retry_iterations: Option<i64>,

    /// Messages the transport may buffer ahead of receive calls
    #[arg(long, allow_negative_numbers = true)]
    pub prefetch_count: Option<i64>,

    /// Seconds workers get to shut down after Ctrl+C before they are aborted
    #[arg(long)]
    pub shutdown_grace_seconds: Option<u64>,

    /// File receiving the Prometheus text exposition of drain metrics
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Logging level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Print the resolved settings as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Drain failed: {0}")]
    Drain(#[from] DrainError),

    #[error("Transport error: {0}")]
    Transport(#[source] QueueError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    ///
    /// | Code | Meaning |
    /// |---|---|
    /// | 1 | invalid configuration or arguments |
    /// | 2 | at least one queue could not be drained |
    /// | 3 | the transport could not be set up or reached |
    /// | 4 | metrics registry failure |
    /// | 5 | I/O failure |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Drain(DrainError::Configuration(_)) => 1,
            Self::Drain(e) if e.is_transport() => 3,
            Self::Drain(_) => 2,
            Self::Transport(_) => 3,
            Self::Metrics(_) => 4,
            Self::Io(_) => 5,
        }
    }
}

impl From<QueueError> for CliError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::ConfigurationError(e) => Self::Configuration(ConfigError::Connection(e)),
            other => Self::Transport(other),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Drain(#[from] queue_drain_core::ConfigurationError),

    #[error("Invalid connection string: {0}")]
    Connection(#[source] queue_runtime::ConfigurationError),

    #[error("Cannot render settings: {0}")]
    Render(#[from] toml::ser::Error),
}

// ============================================================================
// Settings
// ============================================================================

/// Settings as read from the configuration file and environment
///
/// Every field is optional so that partial files and environments merge; the
/// numeric options keep their raw signed values because non-positive values
/// select the defaults.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DrainSettings {
    pub connection_string: Option<String>,
    pub topic: Option<String>,
    pub subscriptions: Vec<String>,
    pub queue: Option<String>,
    pub timeout_seconds: Option<i64>,
    pub batch_size: Option<i64>,
    pub retry_iterations: Option<i64>,
    pub prefetch_count: Option<i64>,
    pub shutdown_grace_seconds: Option<u64>,
    pub metrics_file: Option<PathBuf>,
    pub logging: LoggingSettings,
}

impl fmt::Debug for DrainSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainSettings")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("topic", &self.topic)
            .field("subscriptions", &self.subscriptions)
            .field("queue", &self.queue)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("batch_size", &self.batch_size)
            .field("retry_iterations", &self.retry_iterations)
            .field("prefetch_count", &self.prefetch_count)
            .field("shutdown_grace_seconds", &self.shutdown_grace_seconds)
            .field("metrics_file", &self.metrics_file)
            .field("logging", &self.logging)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum LogFormat {
    #[default]
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
}

impl DrainSettings {
    /// Layer command-line flags over these settings
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(connection_string) = &cli.connection_string {
            self.connection_string = Some(connection_string.clone());
        }
        if let Some(topic) = &cli.topic {
            self.topic = Some(topic.clone());
        }
        if !cli.subscriptions.is_empty() {
            self.subscriptions = cli.subscriptions.clone();
        }
        if let Some(queue) = &cli.queue {
            self.queue = Some(queue.clone());
        }
        self.timeout_seconds = cli.timeout_seconds.or(self.timeout_seconds);
        self.batch_size = cli.batch_size.or(self.batch_size);
        self.retry_iterations = cli.retry_iterations.or(self.retry_iterations);
        self.prefetch_count = cli.prefetch_count.or(self.prefetch_count);
        self.shutdown_grace_seconds = cli.shutdown_grace_seconds.or(self.shutdown_grace_seconds);
        if let Some(path) = &cli.metrics_file {
            self.metrics_file = Some(path.clone());
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if cli.json_logs {
            self.logging.format = LogFormat::Json;
        }
        self
    }

    /// Copy safe to print: the connection string is replaced by a marker
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.connection_string.is_some() {
            copy.connection_string = Some("<redacted>".to_string());
        }
        copy
    }

    /// Turn the settings into a validated drain request
    ///
    /// # Errors
    ///
    /// Fails when the connection string, the topic or every subscription is
    /// missing, when the queue selection is unknown, or when the resulting
    /// drain configuration is invalid.
    pub fn resolve(&self) -> Result<DrainRequest, ConfigError> {
        let connection_string = required(&self.connection_string, "connection_string")?;
        let topic = required(&self.topic, "topic")?;

        let subscriptions: Vec<String> = self
            .subscriptions
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if subscriptions.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "subscriptions".to_string(),
            });
        }

        let selector = match &self.queue {
            Some(queue) => queue.parse::<QueueSelector>()?,
            None => QueueSelector::MAIN,
        };

        let config = DrainConfig::from_options(
            self.timeout_seconds,
            self.batch_size,
            self.retry_iterations,
            self.prefetch_count,
        );
        config.validate()?;

        Ok(DrainRequest {
            connection_string,
            topic,
            subscriptions,
            selector,
            config,
            shutdown_grace: Duration::from_secs(
                self.shutdown_grace_seconds
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECONDS),
            ),
            metrics_file: self.metrics_file.clone(),
        })
    }
}

fn required(value: &Option<String>, key: &str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
        })
}

/// Everything needed to start a drain run
#[derive(Clone, PartialEq)]
pub struct DrainRequest {
    pub connection_string: String,
    pub topic: String,
    pub subscriptions: Vec<String>,
    pub selector: QueueSelector,
    pub config: DrainConfig,
    pub shutdown_grace: Duration,
    pub metrics_file: Option<PathBuf>,
}

impl fmt::Debug for DrainRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainRequest")
            .field("connection_string", &"<redacted>")
            .field("topic", &self.topic)
            .field("subscriptions", &self.subscriptions)
            .field("selector", &self.selector)
            .field("config", &self.config)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("metrics_file", &self.metrics_file)
            .finish()
    }
}

/// Load settings: defaults, then the configuration file, then `QUEUE_DRAIN__*`
/// environment variables, then command-line flags
///
/// Nested keys use a double underscore (`QUEUE_DRAIN__LOGGING__LEVEL`) and
/// `QUEUE_DRAIN__SUBSCRIPTIONS` takes a comma-separated list.
pub fn load_settings(cli: &Cli) -> Result<DrainSettings, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = &cli.config {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound { path: path.clone() });
        }
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }

    let settings: DrainSettings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("subscriptions")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    Ok(settings.with_overrides(cli))
}

// ============================================================================
// Logging
// ============================================================================

/// Initialize logging
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr.
/// Calling this again once a subscriber is installed has no effect.
pub fn initialize_logging(logging: &LoggingSettings) -> Result<(), ConfigError> {
    let level = logging
        .level
        .parse::<tracing::Level>()
        .map_err(|e| ConfigError::InvalidValue {
            key: "logging.level".to_string(),
            message: e.to_string(),
        })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,queue_drain={level},queue_drain_cli={level},queue_drain_core={level},\
             queue_runtime={level}",
            level = level.as_str().to_lowercase()
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match logging.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    if installed.is_err() {
        debug!("Logging already initialized");
    }

    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
///
/// Drains every requested queue and returns the run summary. The run stops
/// early, and successfully, once `shutdown` completes. With `--print-config`
/// the resolved settings are printed instead and `Ok(None)` is returned.
pub async fn run_cli<S>(cli: Cli, shutdown: S) -> Result<Option<DrainSummary>, CliError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let settings = load_settings(&cli)?;
    initialize_logging(&settings.logging)?;

    if cli.print_config {
        let rendered = toml::to_string(&settings.redacted()).map_err(ConfigError::from)?;
        print!("{}", rendered);
        return Ok(None);
    }

    let request = settings.resolve()?;
    debug!(request = ?request, "Resolved drain request");

    run_drain(request, shutdown).await.map(Some)
}

/// Drain the queues described by `request` over Azure Service Bus
pub async fn run_drain<S>(request: DrainRequest, shutdown: S) -> Result<DrainSummary, CliError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let connector =
        AzureServiceBusConnector::new(AzureServiceBusConfig::new(&request.connection_string))?;
    let targets = plan_targets(
        connector.namespace(),
        &request.topic,
        &request.subscriptions,
        request.selector,
    )
    .map_err(ConfigError::from)?;

    let telemetry = PrometheusTelemetry::new(request.metrics_file.clone())?;
    let coordinator = DrainCoordinator::new(
        request.config.clone(),
        Arc::new(connector),
        Arc::new(telemetry),
    )
    .with_shutdown_grace(request.shutdown_grace);

    let stop = coordinator.stop_handle();
    let signal_watcher = tokio::spawn(async move {
        shutdown.await;
        info!("Shutdown requested, stopping drain workers");
        stop.stop();
    });

    let result = coordinator.run(targets).await;
    signal_watcher.abort();

    let summary = result?;
    if summary.cancelled {
        info!(
            messages = summary.total_messages(),
            "Drain stopped before every queue was confirmed empty"
        );
    }

    Ok(summary.into_result()?)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
