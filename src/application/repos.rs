//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::application::catalog::ResolvedQuery;
use crate::domain::indicators::DataSource;
use crate::domain::rows::IndicatorRows;

/// Failure to obtain a connection to a data source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("{name} is not configured")]
    SourceUnavailable { name: &'static str },
    #[error("timed out acquiring a connection to {name}")]
    Timeout { name: &'static str },
    #[error("could not connect to {name}: {message}")]
    Unreachable { name: &'static str, message: String },
}

impl ConnectionError {
    pub fn source_unavailable(source: DataSource) -> Self {
        Self::SourceUnavailable {
            name: source.label(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("query failed: {0}")]
    Query(String),
    #[error("result does not match the expected row schema: {0}")]
    Schema(String),
}

impl RepoError {
    pub fn from_query(err: impl std::fmt::Display) -> Self {
        Self::Query(err.to_string())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, RepoError::Connection(_))
    }

    /// Log label of the error taxonomy: connection problems versus everything
    /// that went wrong once a connection was obtained.
    pub fn kind(&self) -> &'static str {
        if self.is_connection() {
            "ConnectionError"
        } else {
            "QueryError"
        }
    }
}

/// Executes resolved indicator queries against their data source.
#[async_trait]
pub trait KpiRepo: Send + Sync {
    async fn fetch(&self, query: &ResolvedQuery) -> Result<IndicatorRows, RepoError>;
}

/// Identity of a reachable data source as reported by the server itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub database: String,
    pub server_addr: Option<String>,
}

#[async_trait]
pub trait SourceProbe: Send + Sync {
    async fn probe(&self, source: DataSource) -> Result<SourceInfo, RepoError>;

    /// Whether credentials for `source` are present in configuration.
    fn is_configured(&self, source: DataSource) -> bool;
}
