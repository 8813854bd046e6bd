//! Configuration layer: typed settings with layered precedence
//! (file → `.env` → prefixed env → legacy env → CLI).

mod cli;

pub use cli::{CliArgs, Command, DatabaseArgs, DatabaseOverrides, ServeArgs, ServeOverrides};

use std::{
    fmt,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "connexa-monitor";
const ENV_PREFIX: &str = "CONNEXA_MONITOR";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8501;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_PG_PORT: u16 = 5432;
const DEFAULT_PG_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_PG_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SQLSERVER_PORT: u16 = 1433;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: usize = 256;
const DEFAULT_CACHE_SWEEP_SECS: u64 = 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub postgres: PostgresSettings,
    /// Present only when every SQL Server credential is configured.
    pub sqlserver: Option<SqlServerSettings>,
    pub cache: CacheSettings,
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Secret,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SqlServerSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub capacity: NonZeroUsize,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    /// Create the `mon` views before serving.
    pub ensure_objects: bool,
}

/// Credential wrapper that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("failed to read env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("missing required configuration `{key}` (set {env})")]
    Missing {
        key: &'static str,
        env: &'static str,
    },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence.
///
/// `env` supplies the process environment for the legacy variable names
/// (`PG_HOST`, `SQLSERVER_HOST`, `CACHE_TTL_SECONDS`, ...).
pub fn load(
    cli: &CliArgs,
    env: impl IntoIterator<Item = (String, String)>,
) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_legacy_env(env)?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::EnsureObjects(args)) | Some(Command::Probe(args)) => {
            raw.apply_database_overrides(&args.database)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Parse the CLI, read the dotenv file and resolve settings against the process environment.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    load_env_file(&args)?;
    let settings = load(&args, std::env::vars())?;
    Ok((args, settings))
}

fn load_env_file(args: &CliArgs) -> Result<(), LoadError> {
    match args.env_file.as_ref() {
        Some(path) => dotenvy::from_path(path).map_err(LoadError::from),
        None => {
            dotenvy::dotenv().ok();
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    postgres: RawPostgresSettings,
    sqlserver: RawSqlServerSettings,
    cache: RawCacheSettings,
    dashboard: RawDashboardSettings,
}

impl RawSettings {
    fn apply_legacy_env(
        &mut self,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), LoadError> {
        let mut sqlserver_aliases = RawSqlServerSettings::default();

        for (key, raw_value) in env {
            if raw_value.trim().is_empty() {
                continue;
            }
            if is_secret_key(&key) {
                let secret = Some(raw_value);
                match key.as_str() {
                    "PG_PASSWORD" => self.postgres.password = secret,
                    "SQLSERVER_PASSWORD" => self.sqlserver.password = secret,
                    _ => sqlserver_aliases.password = secret,
                }
                continue;
            }

            let value = raw_value.trim();
            let text = Some(value.to_string());
            match key.as_str() {
                "PG_HOST" => self.postgres.host = text,
                "PG_PORT" => self.postgres.port = Some(parse_port("PG_PORT", value)?),
                "PG_DB" => self.postgres.database = text,
                "PG_USER" => self.postgres.user = text,
                "SQLSERVER_HOST" => self.sqlserver.host = text,
                "SQLSERVER_PORT" => {
                    self.sqlserver.port = Some(parse_port("SQLSERVER_PORT", value)?)
                }
                "SQLSERVER_DB" => self.sqlserver.database = text,
                "SQLSERVER_USER" => self.sqlserver.user = text,
                "SQL_SERVER" => sqlserver_aliases.host = text,
                "SQL_PORT" => sqlserver_aliases.port = Some(parse_port("SQL_PORT", value)?),
                "SQL_DATABASE" => sqlserver_aliases.database = text,
                "SQL_USER" => sqlserver_aliases.user = text,
                "CACHE_TTL_SECONDS" => {
                    let seconds = value.parse::<u64>().map_err(|err| {
                        LoadError::invalid("cache.ttl_seconds", format!("CACHE_TTL_SECONDS: {err}"))
                    })?;
                    self.cache.ttl_seconds = Some(seconds);
                }
                _ => {}
            }
        }

        self.sqlserver.fill_from(sqlserver_aliases);
        Ok(())
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(ensure) = overrides.ensure_objects {
            self.dashboard.ensure_objects = Some(ensure);
        }

        self.apply_database_overrides(&overrides.database);
    }

    fn apply_database_overrides(&mut self, overrides: &DatabaseOverrides) {
        if let Some(host) = overrides.pg_host.as_ref() {
            self.postgres.host = Some(host.clone());
        }
        if let Some(port) = overrides.pg_port {
            self.postgres.port = Some(port);
        }
        if let Some(db) = overrides.pg_db.as_ref() {
            self.postgres.database = Some(db.clone());
        }
        if let Some(user) = overrides.pg_user.as_ref() {
            self.postgres.user = Some(user.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            postgres,
            sqlserver,
            cache,
            dashboard,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            postgres: build_postgres_settings(postgres)?,
            sqlserver: build_sqlserver_settings(sqlserver)?,
            cache: build_cache_settings(cache)?,
            dashboard: build_dashboard_settings(dashboard),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_postgres_settings(postgres: RawPostgresSettings) -> Result<PostgresSettings, LoadError> {
    let host = required(postgres.host, "postgres.host", "PG_HOST")?;
    let database = required(postgres.database, "postgres.database", "PG_DB")?;
    let user = required(postgres.user, "postgres.user", "PG_USER")?;
    let password = required_secret(postgres.password, "postgres.password", "PG_PASSWORD")?;

    let port = postgres.port.unwrap_or(DEFAULT_PG_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "postgres.port",
            "port must be greater than zero",
        ));
    }

    let max_connections = NonZeroU32::new(
        postgres
            .max_connections
            .unwrap_or(DEFAULT_PG_MAX_CONNECTIONS),
    )
    .ok_or_else(|| LoadError::invalid("postgres.max_connections", "must be greater than zero"))?;

    let acquire_secs = postgres
        .acquire_timeout_seconds
        .unwrap_or(DEFAULT_PG_ACQUIRE_TIMEOUT_SECS);
    if acquire_secs == 0 {
        return Err(LoadError::invalid(
            "postgres.acquire_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(PostgresSettings {
        host,
        port,
        database,
        user,
        password: Secret::new(password),
        max_connections,
        acquire_timeout: Duration::from_secs(acquire_secs),
    })
}

fn build_sqlserver_settings(
    sqlserver: RawSqlServerSettings,
) -> Result<Option<SqlServerSettings>, LoadError> {
    let port = sqlserver.port.unwrap_or(DEFAULT_SQLSERVER_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "sqlserver.port",
            "port must be greater than zero",
        ));
    }

    let RawSqlServerSettings {
        host,
        database,
        user,
        password,
        ..
    } = sqlserver;

    match (host, database, user, password) {
        (Some(host), Some(database), Some(user), Some(password)) => Ok(Some(SqlServerSettings {
            host,
            port,
            database,
            user,
            password: Secret::new(password),
        })),
        _ => Ok(None),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_secs = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let capacity = NonZeroUsize::new(cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY))
        .ok_or_else(|| LoadError::invalid("cache.capacity", "must be greater than zero"))?;

    let sweep_secs = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_CACHE_SWEEP_SECS);
    if sweep_secs == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        ttl: Duration::from_secs(ttl_secs),
        capacity,
        sweep_interval: Duration::from_secs(sweep_secs),
    })
}

fn build_dashboard_settings(dashboard: RawDashboardSettings) -> DashboardSettings {
    DashboardSettings {
        ensure_objects: dashboard.ensure_objects.unwrap_or(true),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPostgresSettings {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSqlServerSettings {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl RawSqlServerSettings {
    /// Take values from `aliases` only where nothing was set yet.
    fn fill_from(&mut self, aliases: RawSqlServerSettings) {
        self.host = self.host.take().or(aliases.host);
        self.port = self.port.or(aliases.port);
        self.database = self.database.take().or(aliases.database);
        self.user = self.user.take().or(aliases.user);
        self.password = self.password.take().or(aliases.password);
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
    capacity: Option<usize>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDashboardSettings {
    ensure_objects: Option<bool>,
}

fn required(
    value: Option<String>,
    key: &'static str,
    env: &'static str,
) -> Result<String, LoadError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(LoadError::Missing { key, env })
}

/// Like [`required`], but the value is kept byte for byte.
fn required_secret(
    value: Option<String>,
    key: &'static str,
    env: &'static str,
) -> Result<String, LoadError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or(LoadError::Missing { key, env })
}

fn is_secret_key(key: &str) -> bool {
    matches!(key, "PG_PASSWORD" | "SQLSERVER_PASSWORD" | "SQL_PASSWORD")
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, LoadError> {
    value
        .parse::<u16>()
        .map_err(|err| LoadError::invalid(key, format!("invalid port `{value}`: {err}")))
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
