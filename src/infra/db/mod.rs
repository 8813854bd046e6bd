//! PostgreSQL-backed data source adapters.

mod kpi;
mod schema;
mod util;

pub use schema::{MONITOR_OBJECTS, ensure_monitor_objects};
pub use util::map_sqlx_error;

use async_trait::async_trait;
use sqlx::{
    PgPool, Postgres,
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPoolOptions},
    query, query_as,
};
use tracing::debug;

use crate::application::repos::{ConnectionError, RepoError, SourceInfo, SourceProbe};
use crate::config::{PostgresSettings, SqlServerSettings};
use crate::domain::indicators::DataSource;

const APPLICATION_NAME: &str = "connexa-monitor";

/// Connection provider for the dashboard's data sources.
///
/// The primary pool connects lazily, so the server starts even when
/// PostgreSQL is down and every indicator reports the outage instead. The
/// secondary source is configuration only: its presence is reported but no
/// connection is ever opened.
#[derive(Clone)]
pub struct PostgresSources {
    pool: PgPool,
    sqlserver_configured: bool,
}

impl PostgresSources {
    pub fn connect_lazy(
        postgres: &PostgresSettings,
        sqlserver: Option<&SqlServerSettings>,
    ) -> Self {
        let options = PgConnectOptions::new()
            .host(&postgres.host)
            .port(postgres.port)
            .database(&postgres.database)
            .username(&postgres.user)
            .password(postgres.password.expose())
            .application_name(APPLICATION_NAME);

        let pool = PgPoolOptions::new()
            .max_connections(postgres.max_connections.get())
            .acquire_timeout(postgres.acquire_timeout)
            .connect_lazy_with(options);

        Self::new(pool, sqlserver.is_some())
    }

    pub fn new(pool: PgPool, sqlserver_configured: bool) -> Self {
        Self {
            pool,
            sqlserver_configured,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Scoped connection to `source`, returned to the pool when dropped.
    pub async fn acquire(&self, source: DataSource) -> Result<PoolConnection<Postgres>, RepoError> {
        match source {
            DataSource::Primary => self
                .pool
                .acquire()
                .await
                .map_err(|err| map_sqlx_error(source, err)),
            DataSource::Secondary => Err(ConnectionError::source_unavailable(source).into()),
        }
    }

    pub async fn health_check(&self) -> Result<(), RepoError> {
        let mut conn = self.acquire(DataSource::Primary).await?;
        query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(|err| map_sqlx_error(DataSource::Primary, err))
    }
}

#[async_trait]
impl SourceProbe for PostgresSources {
    async fn probe(&self, source: DataSource) -> Result<SourceInfo, RepoError> {
        let mut conn = self.acquire(source).await?;
        let (database, server_addr): (String, Option<String>) = query_as(
            "SELECT current_database()::text, host(inet_server_addr())::text",
        )
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| map_sqlx_error(source, err))?;

        debug!(source = source.label(), database = %database, "Probed data source");
        Ok(SourceInfo {
            database,
            server_addr,
        })
    }

    fn is_configured(&self, source: DataSource) -> bool {
        match source {
            DataSource::Primary => true,
            DataSource::Secondary => self.sqlserver_configured,
        }
    }
}
