mod dashboard;
mod middleware;

pub use dashboard::SESSION_COOKIE;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::application::error::ErrorReport;
use crate::application::indicator::{IndicatorCache, IndicatorPage, IndicatorService};
use crate::application::repos::{KpiRepo, RepoError, SourceInfo, SourceProbe};
use crate::application::shell::DashboardShell;
use crate::application::sources::SourceStatusService;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct MonitorState {
    pub page: IndicatorPage,
    pub shell: Arc<DashboardShell>,
    pub sources: SourceStatusService,
}

impl MonitorState {
    pub fn new(
        repo: Arc<dyn KpiRepo>,
        probe: Arc<dyn SourceProbe>,
        cache: Arc<IndicatorCache>,
        shell: Arc<DashboardShell>,
    ) -> Self {
        let service = IndicatorService::new(repo, cache);
        Self {
            page: IndicatorPage::new(Arc::clone(&shell), service),
            shell,
            sources: SourceStatusService::new(probe),
        }
    }
}

pub fn build_router(state: MonitorState) -> Router {
    Router::new()
        .route("/", get(dashboard::overview))
        .route("/indicators/{slug}", get(dashboard::indicator_page))
        .route("/indicators/{slug}/export.csv", get(dashboard::export_csv))
        .route("/api/indicators/{slug}", get(dashboard::indicator_json))
        .route("/filters", post(dashboard::apply_filters))
        .route("/_health/db", get(dashboard::db_health))
        .route("/_health/sources", get(dashboard::sources_health))
        .fallback(dashboard::not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(log_responses))
        .layer(axum::middleware::from_fn(set_request_context))
}

fn db_health_response(result: Result<SourceInfo, RepoError>) -> Response {
    match result {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
