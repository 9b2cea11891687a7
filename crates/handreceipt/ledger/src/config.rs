//! Ledger configuration and backend selection.

use crate::chain::{AppendMode, ChainSettings, DEFAULT_HISTORY_LIMIT};
use crate::memory::InMemoryLedgerService;
use crate::traits::LedgerService;
use crate::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "HANDRECEIPT_LEDGER";

/// Main ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Backing store
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub append_mode: AppendMode,

    /// Upper bound on `get_general_history`
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Per-operation deadline in seconds
    #[serde(default)]
    pub operation_timeout_secs: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            append_mode: AppendMode::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            operation_timeout_secs: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-memory recorder (tests and demos)
    #[default]
    Memory,

    /// SQLite hash chain
    Sqlite {
        /// Connection URL, e.g. `sqlite://ledger.db`
        url: String,

        /// Maximum read connections
        #[serde(default = "default_sqlite_pool_size")]
        max_connections: u32,
    },

    /// PostgreSQL hash chain
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },

    /// immudb through its REST gateway
    Immudb {
        /// Gateway URL
        url: String,

        #[serde(default = "default_immudb_user")]
        username: String,

        #[serde(default = "default_immudb_user")]
        password: String,

        #[serde(default = "default_immudb_database")]
        database: String,
    },
}

impl BackendConfig {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite { .. } => "sqlite",
            Self::Postgres { .. } => "postgres",
            Self::Immudb { .. } => "immudb",
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_sqlite_pool_size() -> u32 {
    4
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_immudb_user() -> String {
    "immudb".to_string()
}

fn default_immudb_database() -> String {
    "defaultdb".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LedgerConfig {
    /// Load defaults, then the optional file, then `HANDRECEIPT_LEDGER__*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> LedgerResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(
            config::Config::try_from(&LedgerConfig::default()).map_err(config_error)?,
        );

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.history_limit == 0 {
            return Err(LedgerError::Config(
                "history_limit must be greater than zero".to_string(),
            ));
        }
        if self.operation_timeout_secs == Some(0) {
            return Err(LedgerError::Config(
                "operation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        match &self.backend {
            BackendConfig::Memory => Ok(()),
            BackendConfig::Sqlite { url, max_connections }
            | BackendConfig::Postgres {
                url,
                max_connections,
                ..
            } => {
                if url.trim().is_empty() {
                    return Err(LedgerError::Config(format!(
                        "{} backend requires a url",
                        self.backend.label()
                    )));
                }
                if *max_connections == 0 {
                    return Err(LedgerError::Config(
                        "max_connections must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            BackendConfig::Immudb { url, database, .. } => {
                if url.trim().is_empty() || database.trim().is_empty() {
                    return Err(LedgerError::Config(
                        "immudb backend requires a url and database".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }

    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            append_mode: self.append_mode,
            history_limit: self.history_limit,
            operation_timeout: self.operation_timeout(),
        }
    }
}

fn config_error(err: config::ConfigError) -> LedgerError {
    LedgerError::Config(err.to_string())
}

/// Build the configured backend. The returned ledger is not yet initialized.
pub async fn open_ledger(config: &LedgerConfig) -> LedgerResult<Arc<dyn LedgerService>> {
    config.validate()?;
    let ledger: Arc<dyn LedgerService> = match &config.backend {
        BackendConfig::Memory => {
            Arc::new(InMemoryLedgerService::with_history_limit(config.history_limit))
        }
        BackendConfig::Sqlite {
            url,
            max_connections,
        } => open_sqlite(config, url, *max_connections).await?,
        BackendConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => open_postgres(config, url, *max_connections, *connect_timeout_secs).await?,
        BackendConfig::Immudb {
            url,
            username,
            password,
            database,
        } => open_immudb(config, url, username, password, database)?,
    };
    info!(backend = ledger.backend_name(), "ledger backend selected");
    Ok(ledger)
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(
    config: &LedgerConfig,
    url: &str,
    max_connections: u32,
) -> LedgerResult<Arc<dyn LedgerService>> {
    let store = crate::sqlite::SqliteEntryStore::connect_with_options(url, max_connections).await?;
    Ok(Arc::new(crate::ChainedLedger::with_settings(
        store,
        config.chain_settings(),
    )))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(
    _config: &LedgerConfig,
    _url: &str,
    _max_connections: u32,
) -> LedgerResult<Arc<dyn LedgerService>> {
    Err(missing_feature("sqlite"))
}

#[cfg(feature = "postgres")]
async fn open_postgres(
    config: &LedgerConfig,
    url: &str,
    max_connections: u32,
    connect_timeout_secs: u64,
) -> LedgerResult<Arc<dyn LedgerService>> {
    let store = crate::postgres::PostgresEntryStore::connect_with_options(
        url,
        max_connections,
        connect_timeout_secs,
    )
    .await?;
    Ok(Arc::new(crate::ChainedLedger::with_settings(
        store,
        config.chain_settings(),
    )))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(
    _config: &LedgerConfig,
    _url: &str,
    _max_connections: u32,
    _connect_timeout_secs: u64,
) -> LedgerResult<Arc<dyn LedgerService>> {
    Err(missing_feature("postgres"))
}

#[cfg(feature = "immudb")]
fn open_immudb(
    config: &LedgerConfig,
    url: &str,
    username: &str,
    password: &str,
    database: &str,
) -> LedgerResult<Arc<dyn LedgerService>> {
    use crate::immudb::{ImmudbLedgerService, ImmudbRestClient, ImmudbSettings};

    let client = ImmudbRestClient::new(ImmudbSettings {
        url: url.to_string(),
        username: username.to_string(),
        password: password.to_string(),
        database: database.to_string(),
        timeout: config
            .operation_timeout()
            .unwrap_or(Duration::from_secs(30)),
    })?;
    Ok(Arc::new(ImmudbLedgerService::new(client)))
}

#[cfg(not(feature = "immudb"))]
fn open_immudb(
    _config: &LedgerConfig,
    _url: &str,
    _username: &str,
    _password: &str,
    _database: &str,
) -> LedgerResult<Arc<dyn LedgerService>> {
    Err(missing_feature("immudb"))
}

#[cfg(not(all(feature = "sqlite", feature = "postgres", feature = "immudb")))]
fn missing_feature(feature: &str) -> LedgerError {
    LedgerError::Config(format!(
        "the {feature} backend is not compiled in; enable the `{feature}` feature"
    ))
}
