use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::application::repos::{RepoError, SourceInfo, SourceProbe};
use crate::domain::indicators::DataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Reachable,
    Unreachable,
    /// Credentials present; the source is not queried by any indicator yet.
    Configured,
    NotConfigured,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: DataSource,
    pub label: &'static str,
    pub state: SourceState,
    pub database: Option<String>,
    pub server_addr: Option<String>,
}

impl SourceStatus {
    pub fn is_healthy(&self) -> bool {
        !matches!(self.state, SourceState::Unreachable)
    }
}

/// Reports which data sources the dashboard can use.
#[derive(Clone)]
pub struct SourceStatusService {
    probe: Arc<dyn SourceProbe>,
}

impl SourceStatusService {
    pub fn new(probe: Arc<dyn SourceProbe>) -> Self {
        Self { probe }
    }

    /// Round trip to the primary source, for health checks.
    pub async fn probe_primary(&self) -> Result<SourceInfo, RepoError> {
        self.probe.probe(DataSource::Primary).await
    }

    pub async fn primary(&self) -> SourceStatus {
        let source = DataSource::Primary;
        match self.probe_primary().await {
            Ok(info) => SourceStatus {
                source,
                label: source.label(),
                state: SourceState::Reachable,
                database: Some(info.database),
                server_addr: info.server_addr,
            },
            Err(err) => {
                warn!(
                    source = source.label(),
                    error = %err,
                    error_kind = err.kind(),
                    "Data source probe failed"
                );
                SourceStatus {
                    source,
                    label: source.label(),
                    state: SourceState::Unreachable,
                    database: None,
                    server_addr: None,
                }
            }
        }
    }

    pub fn secondary(&self) -> SourceStatus {
        let source = DataSource::Secondary;
        let state = if self.probe.is_configured(source) {
            SourceState::Configured
        } else {
            SourceState::NotConfigured
        };
        SourceStatus {
            source,
            label: source.label(),
            state,
            database: None,
            server_addr: None,
        }
    }

    pub async fn all(&self) -> Vec<SourceStatus> {
        vec![self.primary().await, self.secondary()]
    }
}
