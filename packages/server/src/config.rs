//! Server configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use actors::{DEFAULT_HANDLER_TIMEOUT, DEFAULT_POLL_INTERVAL};
use db::{DEFAULT_INTENT_LEASE, DbConfig};
use rpc_core::{KbPath, RetryPolicy, RpcError};
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid path in {name}: {source}")]
    InvalidPath {
        name: &'static str,
        #[source]
        source: RpcError,
    },

    #[error("KB_RPC_DB_USER and KB_RPC_DB_PASS must be set together")]
    PartialCredentials,
}

/// Delay growth between retries, as named in `KB_RPC_BACKOFF`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffMode {
    #[default]
    Fixed,
    Exponential,
}

impl FromStr for BackoffMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffMode::Fixed),
            "exponential" => Ok(BackoffMode::Exponential),
            _ => Err(()),
        }
    }
}

/// Runtime configuration of the RPC server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// SurrealDB endpoint, e.g. `mem://` or `rocksdb://data/rpc`.
    pub db_endpoint: String,
    pub db_namespace: String,
    pub db_name: String,
    pub db_credentials: Option<(String, String)>,
    /// How long an unfinished claim protects its record.
    pub intent_lease: Duration,
    /// Path the server claims jobs from.
    pub server_path: KbPath,
    /// Reply pool provisioned at startup if it does not exist yet.
    pub client_path: KbPath,
    /// Slots in the provisioned reply pool.
    pub pool_depth: usize,
    /// Interval between polls of the server path.
    pub poll_interval: Duration,
    /// Time a handler may run before its request fails.
    pub handler_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: BackoffMode,
    /// Maximum log level.
    pub log_level: tracing::Level,
}

/// Server path used when `KB_RPC_SERVER_PATH` is unset.
pub const DEFAULT_SERVER_PATH: &str = "rpc.server";

/// Client path used when `KB_RPC_CLIENT_PATH` is unset.
pub const DEFAULT_CLIENT_PATH: &str = "rpc.client";

impl ServerConfig {
    /// Defaults overridden by any `KB_RPC_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db = DbConfig::default();
        let retry = RetryPolicy::default();
        let db_credentials = match (std::env::var("KB_RPC_DB_USER"), std::env::var("KB_RPC_DB_PASS")) {
            (Ok(user), Ok(pass)) => Some((user, pass)),
            (Err(_), Err(_)) => None,
            _ => return Err(ConfigError::PartialCredentials),
        };

        Ok(Self {
            db_endpoint: std::env::var("KB_RPC_DB_ENDPOINT").unwrap_or(db.endpoint),
            db_namespace: std::env::var("KB_RPC_DB_NAMESPACE").unwrap_or(db.namespace),
            db_name: std::env::var("KB_RPC_DB_NAME").unwrap_or(db.database),
            db_credentials,
            intent_lease: millis_var("KB_RPC_INTENT_LEASE_MS")?.unwrap_or(DEFAULT_INTENT_LEASE),
            server_path: path_var("KB_RPC_SERVER_PATH", DEFAULT_SERVER_PATH)?,
            client_path: path_var("KB_RPC_CLIENT_PATH", DEFAULT_CLIENT_PATH)?,
            pool_depth: parsed_var("KB_RPC_POOL_DEPTH")?.unwrap_or(16),
            poll_interval: millis_var("KB_RPC_POLL_MS")?.unwrap_or(DEFAULT_POLL_INTERVAL),
            handler_timeout: millis_var("KB_RPC_HANDLER_TIMEOUT_MS")?
                .unwrap_or(DEFAULT_HANDLER_TIMEOUT),
            max_retries: parsed_var("KB_RPC_MAX_RETRIES")?.unwrap_or(retry.max_retries),
            retry_delay: millis_var("KB_RPC_RETRY_DELAY_MS")?.unwrap_or(retry.retry_delay),
            backoff: parsed_var("KB_RPC_BACKOFF")?.unwrap_or_default(),
            log_level: parsed_var("KB_RPC_LOG")?.unwrap_or(tracing::Level::INFO),
        })
    }

    /// Database settings for the configured endpoint.
    pub fn db_config(&self) -> DbConfig {
        let config = DbConfig::default()
            .with_endpoint(self.db_endpoint.clone())
            .with_namespace(self.db_namespace.clone())
            .with_database(self.db_name.clone());
        match &self.db_credentials {
            Some((user, pass)) => config.with_credentials(user.clone(), pass.clone()),
            None => config,
        }
    }

    /// Retry policy shared by every queue operation.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_retries, self.retry_delay);
        match self.backoff {
            BackoffMode::Fixed => policy,
            BackoffMode::Exponential => policy.with_exponential_backoff(),
        }
    }
}

fn parsed_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(ConfigError::InvalidValue { name, value }),
        },
        Err(_) => Ok(None),
    }
}

fn millis_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parsed_var(name)?.map(Duration::from_millis))
}

fn path_var(name: &'static str, default: &str) -> Result<KbPath, ConfigError> {
    let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
    KbPath::parse(value).map_err(|source| ConfigError::InvalidPath { name, source })
}
