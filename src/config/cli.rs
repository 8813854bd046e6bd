use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the CONNEXA Monitor binary.
#[derive(Debug, Parser)]
#[command(
    name = "connexa-monitor",
    version,
    about = "CONNEXA Monitor KPI dashboard"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CONNEXA_MONITOR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Dotenv file with PG_* / SQLSERVER_* credentials (defaults to `.env`).
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the dashboard HTTP server.
    Serve(Box<ServeArgs>),
    /// Create or refresh the `mon` schema views and supporting indexes.
    #[command(name = "ensure-objects")]
    EnsureObjects(DatabaseArgs),
    /// Check connectivity to the configured data sources.
    Probe(DatabaseArgs),
}

impl Command {
    pub fn serve_default() -> Self {
        Command::Serve(Box::<ServeArgs>::default())
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseArgs {
    #[command(flatten)]
    pub database: DatabaseOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverrides {
    /// Override the PostgreSQL host.
    #[arg(long = "pg-host", value_name = "HOST")]
    pub pg_host: Option<String>,

    /// Override the PostgreSQL port.
    #[arg(long = "pg-port", value_name = "PORT")]
    pub pg_port: Option<u16>,

    /// Override the PostgreSQL database name.
    #[arg(long = "pg-db", value_name = "NAME")]
    pub pg_db: Option<String>,

    /// Override the PostgreSQL user.
    #[arg(long = "pg-user", value_name = "USER")]
    pub pg_user: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the query cache time-to-live.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Toggle creating the `mon` views at startup.
    #[arg(
        long = "ensure-objects",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub ensure_objects: Option<bool>,
}
