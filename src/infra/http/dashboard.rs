use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{
        HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::application::error::HttpError;
use crate::application::indicator::{RenderOutcome, default_options};
use crate::domain::error::DomainError;
use crate::domain::filters::{FilterError, FilterSet, IndicatorOptions};
use crate::domain::indicators::{FilterParam, IndicatorId};
use crate::presentation::export::{IndicatorPayload, csv_filename, table_to_csv};
use crate::presentation::views::{
    FilterFormView, IndicatorTemplate, LayoutContext, NavigationView, OverviewTemplate,
    OverviewView, indicator_href, render_not_found_response, render_template_response,
};

use super::{MonitorState, db_health_response};

pub const SESSION_COOKIE: &str = "connexa_session";

#[derive(Debug, Default, Deserialize)]
pub(super) struct OptionsQuery {
    names: Option<bool>,
    top: Option<u32>,
}

impl OptionsQuery {
    fn resolve(&self, id: IndicatorId) -> IndicatorOptions {
        resolve_options(id, self.names, self.top)
    }
}

/// Query string of the JSON endpoint. Filter fields override the session
/// filters for this request only.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ApiQuery {
    start: Option<String>,
    end: Option<String>,
    buyer: Option<String>,
    supplier: Option<String>,
    names: Option<bool>,
    top: Option<u32>,
}

impl ApiQuery {
    fn has_filters(&self) -> bool {
        self.start.is_some() || self.end.is_some() || self.buyer.is_some() || self.supplier.is_some()
    }

    fn filters(&self, current: &FilterSet) -> Result<FilterSet, FilterError> {
        if !self.has_filters() {
            return Ok(*current);
        }

        let start = self
            .start
            .clone()
            .unwrap_or_else(|| current.start().to_string());
        let end = self.end.clone().unwrap_or_else(|| current.end().to_string());
        let buyer = self
            .buyer
            .clone()
            .unwrap_or_else(|| optional_id(current.buyer()));
        let supplier = self
            .supplier
            .clone()
            .unwrap_or_else(|| optional_id(current.supplier()));
        FilterSet::parse(&start, &end, &buyer, &supplier)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct FilterForm {
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
    #[serde(default)]
    buyer: String,
    #[serde(default)]
    supplier: String,
    return_to: Option<String>,
}

pub(super) async fn overview(State(state): State<MonitorState>, jar: CookieJar) -> Response {
    let (session, jar) = session(&state, jar);
    let snapshot = state.shell.open(session);
    let sources = state.sources.all().await;

    let view = LayoutContext::new(
        NavigationView::for_page(None),
        Some(FilterFormView::new(
            &snapshot.filters,
            &FilterParam::ALL,
            snapshot.notice,
            "/",
        )),
        OverviewView::new(&sources),
    );
    let mut response = render_template_response(OverviewTemplate { view }, StatusCode::OK);
    set_no_store(&mut response);
    (jar, response).into_response()
}

pub(super) async fn indicator_page(
    State(state): State<MonitorState>,
    Path(slug): Path<String>,
    Query(query): Query<OptionsQuery>,
    uri: Uri,
    jar: CookieJar,
) -> Response {
    let Ok(id) = slug.parse::<IndicatorId>() else {
        return render_not_found_response();
    };
    let (session, jar) = session(&state, jar);
    let options = query.resolve(id);
    let target = uri
        .path_and_query()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| indicator_href(id));
    let return_to = target.clone();

    let outcome = state
        .page
        .render(session, id, options, move |data| {
            IndicatorTemplate::from_page(data, return_to)
        })
        .await;

    match outcome {
        RenderOutcome::Rendered(template) => {
            let mut response = render_template_response(template, StatusCode::OK);
            set_no_store(&mut response);
            (jar, response).into_response()
        }
        RenderOutcome::Superseded => (jar, Redirect::to(&target)).into_response(),
    }
}

pub(super) async fn export_csv(
    State(state): State<MonitorState>,
    Path(slug): Path<String>,
    Query(query): Query<OptionsQuery>,
    jar: CookieJar,
) -> Response {
    let Ok(id) = slug.parse::<IndicatorId>() else {
        return render_not_found_response();
    };
    let (session, jar) = session(&state, jar);
    let filters = state.shell.filters(session);
    let options = query.resolve(id);

    let rows = match state.page.service().rows(id, &filters, options).await {
        Ok(rows) => rows,
        Err(err) => return (jar, HttpError::from(err)).into_response(),
    };

    let mut response = (StatusCode::OK, table_to_csv(&rows.to_table())).into_response();
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    let disposition = format!("attachment; filename=\"{}\"", csv_filename(id, &filters));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    set_no_store(&mut response);
    (jar, response).into_response()
}

pub(super) async fn indicator_json(
    State(state): State<MonitorState>,
    Path(slug): Path<String>,
    Query(query): Query<ApiQuery>,
    jar: CookieJar,
) -> Response {
    let id = match slug.parse::<IndicatorId>() {
        Ok(id) => id,
        Err(err) => return HttpError::from(err).into_response(),
    };
    let (session, jar) = session(&state, jar);
    let filters = match query.filters(&state.shell.filters(session)) {
        Ok(filters) => filters,
        Err(err) => return (jar, HttpError::from(DomainError::from(err))).into_response(),
    };
    let options = resolve_options(id, query.names, query.top);

    let rows = match state.page.service().rows(id, &filters, options).await {
        Ok(rows) => rows,
        Err(err) => return (jar, HttpError::from(err)).into_response(),
    };

    let table = rows.to_table();
    let response = Json(IndicatorPayload::new(id, &filters, options, &table)).into_response();
    (jar, response).into_response()
}

pub(super) async fn apply_filters(
    State(state): State<MonitorState>,
    jar: CookieJar,
    Form(form): Form<FilterForm>,
) -> Response {
    let (session, jar) = session(&state, jar);
    if let Err(err) = state
        .shell
        .apply_form(session, &form.start, &form.end, &form.buyer, &form.supplier)
    {
        debug!(session = %session, error = %err, "Rejected filter form");
    }

    let target = safe_return_to(form.return_to.as_deref());
    (jar, Redirect::to(target)).into_response()
}

pub(super) async fn db_health(State(state): State<MonitorState>) -> Response {
    db_health_response(state.sources.probe_primary().await)
}

pub(super) async fn sources_health(State(state): State<MonitorState>) -> Response {
    let statuses = state.sources.all().await;
    let status = if statuses.iter().all(|status| status.is_healthy()) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(statuses)).into_response()
}

pub(super) async fn not_found() -> Response {
    render_not_found_response()
}

/// Resolve the session cookie, issuing a new one when it is missing or stale.
fn session(state: &MonitorState, jar: CookieJar) -> (Uuid, CookieJar) {
    let existing = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());
    let id = state.shell.session(existing);
    if existing == Some(id) {
        return (id, jar);
    }

    let cookie = Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    (id, jar.add(cookie))
}

fn resolve_options(id: IndicatorId, names: Option<bool>, top: Option<u32>) -> IndicatorOptions {
    let defaults = default_options(id);
    IndicatorOptions::new(
        names.unwrap_or(defaults.show_names()),
        top.unwrap_or(defaults.top_n()),
    )
}

fn optional_id(value: Option<i64>) -> String {
    value.map(|id| id.to_string()).unwrap_or_default()
}

/// Only same-site absolute paths are followed after a form post.
fn safe_return_to(target: Option<&str>) -> &str {
    match target {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/",
    }
}

fn set_no_store(response: &mut Response) {
    let value = HeaderValue::from_static("no-store");
    response.headers_mut().insert(CACHE_CONTROL, value);
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn return_targets_stay_on_site() {
        assert_eq!(
            safe_return_to(Some("/indicators/oc-generadas?top=10")),
            "/indicators/oc-generadas?top=10"
        );
        assert_eq!(safe_return_to(Some("//evil.example")), "/");
        assert_eq!(safe_return_to(Some("https://evil.example")), "/");
        assert_eq!(safe_return_to(None), "/");
    }

    #[test]
    fn oc_page_defaults_to_top_ten() {
        let query = OptionsQuery::default();
        assert_eq!(query.resolve(IndicatorId::OcGeneradas).top_n(), 10);
        assert_eq!(query.resolve(IndicatorId::RankingCompradores).top_n(), 20);

        let query = OptionsQuery {
            names: Some(false),
            top: Some(500),
        };
        let options = query.resolve(IndicatorId::RankingCompradores);
        assert!(!options.show_names());
        assert_eq!(options.top_n(), 50);
    }

    #[test]
    fn api_filters_fall_back_to_the_session() {
        let session = FilterSet::new(date!(2025 - 06 - 01), date!(2025 - 06 - 30), Some(4), None)
            .expect("valid");

        let query = ApiQuery::default();
        assert_eq!(query.filters(&session), Ok(session));

        let query = ApiQuery {
            end: Some("2025-06-15".to_string()),
            ..Default::default()
        };
        let filters = query.filters(&session).expect("valid override");
        assert_eq!(filters.start(), date!(2025 - 06 - 01));
        assert_eq!(filters.end(), date!(2025 - 06 - 15));
        assert_eq!(filters.buyer(), Some(4));

        let query = ApiQuery {
            start: Some("2025-07-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            query.filters(&session),
            Err(FilterError::InvertedRange { .. })
        ));
    }
}
