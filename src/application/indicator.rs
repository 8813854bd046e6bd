//! Indicator page orchestration.
//!
//! A render cycle reads the session filters, resolves each panel of the page
//! through the catalog, loads rows through the shared cache and hands the
//! result to a view builder. Failures stay inside the panel that produced them.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::catalog::{self, CatalogError};
use crate::application::repos::{KpiRepo, RepoError};
use crate::application::shell::DashboardShell;
use crate::cache::{CacheError, TtlCache};
use crate::domain::filters::{DEFAULT_TOP_N, FilterSet, IndicatorOptions};
use crate::domain::indicators::{Indicator, IndicatorId};
use crate::domain::rows::IndicatorRows;

/// Ranking length shown under the monthly OC series.
pub const OC_PAGE_TOP_N: u32 = 10;

/// Indicators that ignore the session filters are keyed without them.
pub type CacheKey = (IndicatorId, Option<FilterSet>, IndicatorOptions);
pub type IndicatorCache = TtlCache<CacheKey, IndicatorRows>;

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("indicator fetch aborted: {0}")]
    Aborted(String),
}

impl From<CacheError<RepoError>> for IndicatorError {
    fn from(err: CacheError<RepoError>) -> Self {
        match err {
            CacheError::Fetch(err) => IndicatorError::Repo(err),
            CacheError::Aborted(message) => IndicatorError::Aborted(message),
        }
    }
}

/// What a single panel ended up showing.
#[derive(Debug, Clone)]
pub enum PanelOutcome {
    Ready(Arc<IndicatorRows>),
    /// Stub indicator; the guidance replaces the data.
    NotImplemented { guidance: &'static str },
    /// The data source could not be reached.
    Unavailable,
    /// The query itself failed.
    Failed,
}

impl PanelOutcome {
    fn label(&self) -> &'static str {
        match self {
            PanelOutcome::Ready(_) => "ready",
            PanelOutcome::NotImplemented { .. } => "not_implemented",
            PanelOutcome::Unavailable => "unavailable",
            PanelOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Panel {
    pub indicator: &'static Indicator,
    pub options: IndicatorOptions,
    pub outcome: PanelOutcome,
}

/// Options an indicator page starts from when the request does not set them.
pub fn default_options(id: IndicatorId) -> IndicatorOptions {
    match id {
        IndicatorId::OcGeneradas => IndicatorOptions::new(true, OC_PAGE_TOP_N),
        _ => IndicatorOptions::default(),
    }
}

/// Panels rendered on the page of `id`, in display order.
pub fn page_panels(
    id: IndicatorId,
    options: IndicatorOptions,
) -> Vec<(IndicatorId, IndicatorOptions)> {
    match id {
        IndicatorId::OcGeneradas => vec![
            (IndicatorId::OcGeneradas, options),
            (IndicatorId::RankingCompradores, options),
        ],
        other => vec![(other, options)],
    }
}

/// Loads indicator rows through the shared cache.
#[derive(Clone)]
pub struct IndicatorService {
    repo: Arc<dyn KpiRepo>,
    cache: Arc<IndicatorCache>,
}

impl IndicatorService {
    pub fn new(repo: Arc<dyn KpiRepo>, cache: Arc<IndicatorCache>) -> Self {
        Self { repo, cache }
    }

    /// Rows for one indicator, served from cache while fresh.
    pub async fn rows(
        &self,
        id: IndicatorId,
        filters: &FilterSet,
        options: IndicatorOptions,
    ) -> Result<Arc<IndicatorRows>, IndicatorError> {
        let query = catalog::resolve(id, filters, &options)?;
        let repo = Arc::clone(&self.repo);
        let rows = self
            .cache
            .get_or_fetch(cache_key(id, filters, options), move || async move {
                repo.fetch(&query).await
            })
            .await?;
        Ok(rows)
    }

    /// Load one panel, turning every failure into a displayable outcome.
    pub async fn load(
        &self,
        id: IndicatorId,
        filters: &FilterSet,
        options: IndicatorOptions,
    ) -> Panel {
        let outcome = match self.rows(id, filters, options).await {
            Ok(rows) => PanelOutcome::Ready(rows),
            Err(IndicatorError::Catalog(CatalogError::NotImplemented { guidance, .. })) => {
                debug!(indicator = %id, "Indicator is a stub");
                PanelOutcome::NotImplemented { guidance }
            }
            Err(IndicatorError::Repo(RepoError::Connection(err))) => {
                warn!(
                    indicator = %id,
                    error = %err,
                    error_kind = "ConnectionError",
                    "Data source unavailable"
                );
                PanelOutcome::Unavailable
            }
            Err(err) => {
                error!(
                    indicator = %id,
                    error = %err,
                    error_kind = "QueryError",
                    "Indicator query failed"
                );
                PanelOutcome::Failed
            }
        };

        counter!(
            "connexa_monitor_indicator_render_total",
            "indicator" => id.slug(),
            "outcome" => outcome.label()
        )
        .increment(1);

        Panel {
            indicator: catalog::indicator(id),
            options,
            outcome,
        }
    }
}

/// Filters and options that do not change an indicator's query are normalized
/// out of the key.
fn cache_key(id: IndicatorId, filters: &FilterSet, options: IndicatorOptions) -> CacheKey {
    let options = match id {
        IndicatorId::RankingCompradores => options,
        IndicatorId::ControlInterfaces => IndicatorOptions::default(),
        _ => IndicatorOptions::new(options.show_names(), DEFAULT_TOP_N),
    };
    let filters = catalog::indicator(id).is_filtered().then_some(*filters);
    (id, filters, options)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Idle,
    FetchingFilters,
    QueryingCache,
    Rendering,
}

/// Phase tracker for one page render.
#[derive(Debug)]
pub struct RenderCycle {
    indicator: IndicatorId,
    phase: RenderPhase,
    history: Vec<RenderPhase>,
}

impl RenderCycle {
    pub fn new(indicator: IndicatorId) -> Self {
        Self {
            indicator,
            phase: RenderPhase::Idle,
            history: vec![RenderPhase::Idle],
        }
    }

    pub fn history(&self) -> &[RenderPhase] {
        &self.history
    }

    /// Move to `next`. Returns false and stays put if the transition is not allowed.
    pub fn advance(&mut self, next: RenderPhase) -> bool {
        let allowed = matches!(
            (self.phase, next),
            (RenderPhase::Idle, RenderPhase::FetchingFilters)
                | (RenderPhase::FetchingFilters, RenderPhase::QueryingCache)
                | (RenderPhase::QueryingCache, RenderPhase::Rendering)
                | (RenderPhase::QueryingCache, RenderPhase::Idle)
                | (RenderPhase::Rendering, RenderPhase::Idle)
        );
        if !allowed {
            warn!(
                indicator = %self.indicator,
                from = ?self.phase,
                to = ?next,
                "Ignoring invalid render transition"
            );
            return false;
        }

        debug!(indicator = %self.indicator, from = ?self.phase, to = ?next, "Render phase");
        self.phase = next;
        self.history.push(next);
        true
    }
}

/// Everything a view needs to draw an indicator page.
#[derive(Debug, Clone)]
pub struct PageData {
    pub session: Uuid,
    pub indicator: &'static Indicator,
    pub filters: FilterSet,
    pub options: IndicatorOptions,
    pub notice: Option<String>,
    pub panels: Vec<Panel>,
}

#[derive(Debug)]
pub enum RenderOutcome<R> {
    Rendered(R),
    /// The session's filters changed while the panels were loading.
    Superseded,
}

/// Drives the render cycle of an indicator page for one session.
#[derive(Clone)]
pub struct IndicatorPage {
    shell: Arc<DashboardShell>,
    service: IndicatorService,
}

impl IndicatorPage {
    pub fn new(shell: Arc<DashboardShell>, service: IndicatorService) -> Self {
        Self { shell, service }
    }

    pub fn service(&self) -> &IndicatorService {
        &self.service
    }

    pub async fn render<R>(
        &self,
        session: Uuid,
        id: IndicatorId,
        options: IndicatorOptions,
        view: impl FnOnce(PageData) -> R,
    ) -> RenderOutcome<R> {
        let mut cycle = RenderCycle::new(id);

        cycle.advance(RenderPhase::FetchingFilters);
        let snapshot = self.shell.open(session);

        cycle.advance(RenderPhase::QueryingCache);
        let mut panels = Vec::new();
        for (panel_id, panel_options) in page_panels(id, options) {
            panels.push(
                self.service
                    .load(panel_id, &snapshot.filters, panel_options)
                    .await,
            );
        }

        if self.shell.generation(session) != Some(snapshot.generation) {
            debug!(
                indicator = %id,
                session = %session,
                "Filters changed during fetch; discarding render"
            );
            cycle.advance(RenderPhase::Idle);
            return RenderOutcome::Superseded;
        }

        cycle.advance(RenderPhase::Rendering);
        let rendered = view(PageData {
            session,
            indicator: catalog::indicator(id),
            filters: snapshot.filters,
            options,
            notice: snapshot.notice,
            panels,
        });
        cycle.advance(RenderPhase::Idle);

        RenderOutcome::Rendered(rendered)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::macros::date;

    use super::*;
    use crate::application::catalog::ResolvedQuery;
    use crate::application::repos::ConnectionError;
    use crate::cache::{CacheConfig, ManualClock};
    use crate::domain::rows::RankingRow;

    type Hook = Box<dyn Fn() + Send + Sync>;

    struct FakeRepo {
        calls: AtomicUsize,
        result: fn() -> Result<IndicatorRows, RepoError>,
        on_fetch: Mutex<Option<Hook>>,
    }

    impl FakeRepo {
        fn new(result: fn() -> Result<IndicatorRows, RepoError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
                on_fetch: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KpiRepo for FakeRepo {
        async fn fetch(&self, _query: &ResolvedQuery) -> Result<IndicatorRows, RepoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.on_fetch.lock().expect("hook lock").as_ref() {
                hook();
            }
            (self.result)()
        }
    }

    fn ranking() -> Result<IndicatorRows, RepoError> {
        Ok(IndicatorRows::Ranking(vec![RankingRow {
            comprador: "ACOSTA".to_string(),
            oc_total: 12,
            bultos_total: 340.5,
        }]))
    }

    fn unreachable() -> Result<IndicatorRows, RepoError> {
        Err(RepoError::Connection(ConnectionError::Timeout {
            name: "CONNEXA (PostgreSQL)",
        }))
    }

    fn broken() -> Result<IndicatorRows, RepoError> {
        Err(RepoError::from_query("column \"mes\" does not exist"))
    }

    fn service(repo: Arc<FakeRepo>) -> IndicatorService {
        let cache = TtlCache::with_clock(&CacheConfig::default(), Arc::new(ManualClock::new()));
        IndicatorService::new(repo, Arc::new(cache))
    }

    fn shell() -> Arc<DashboardShell> {
        Arc::new(DashboardShell::new(|| date!(2025 - 07 - 15)))
    }

    fn filters() -> FilterSet {
        FilterSet::month_to_date(date!(2025 - 07 - 15))
    }

    #[tokio::test]
    async fn stub_panels_skip_the_repository() {
        let repo = FakeRepo::new(ranking);
        let service = service(Arc::clone(&repo));

        let panel = service
            .load(IndicatorId::OcAprobadasSgm, &filters(), IndicatorOptions::default())
            .await;

        match panel.outcome {
            PanelOutcome::NotImplemented { guidance } => {
                assert!(guidance.contains("requires SQL Server / tablas SGM"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn connection_failures_render_as_unavailable() {
        let repo = FakeRepo::new(unreachable);
        let service = service(Arc::clone(&repo));

        for _ in 0..2 {
            let panel = service
                .load(IndicatorId::RankingCompradores, &filters(), IndicatorOptions::default())
                .await;
            assert!(matches!(panel.outcome, PanelOutcome::Unavailable));
        }
        assert_eq!(repo.calls(), 2, "failures are retried on every render");
    }

    #[tokio::test]
    async fn query_failures_render_as_failed() {
        let service = service(FakeRepo::new(broken));
        let panel = service
            .load(IndicatorId::OcGeneradas, &filters(), IndicatorOptions::default())
            .await;
        assert!(matches!(panel.outcome, PanelOutcome::Failed));
    }

    #[tokio::test]
    async fn repeated_loads_share_the_cached_rows() {
        let repo = FakeRepo::new(ranking);
        let service = service(Arc::clone(&repo));

        let first = service
            .rows(IndicatorId::RankingCompradores, &filters(), IndicatorOptions::default())
            .await
            .expect("rows");
        let second = service
            .rows(IndicatorId::RankingCompradores, &filters(), IndicatorOptions::default())
            .await
            .expect("rows");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(repo.calls(), 1);
    }

    #[test]
    fn top_n_only_keys_the_ranking() {
        let wide = IndicatorOptions::new(true, 40);
        let narrow = IndicatorOptions::new(true, 10);
        assert_eq!(
            cache_key(IndicatorId::OcGeneradas, &filters(), wide),
            cache_key(IndicatorId::OcGeneradas, &filters(), narrow)
        );
        assert_ne!(
            cache_key(IndicatorId::RankingCompradores, &filters(), wide),
            cache_key(IndicatorId::RankingCompradores, &filters(), narrow)
        );
    }

    #[test]
    fn unfiltered_indicators_share_one_key_across_filters() {
        let other = FilterSet::new(date!(2025 - 01 - 01), date!(2025 - 03 - 31), Some(9), None)
            .expect("valid");
        assert_eq!(
            cache_key(IndicatorId::ControlInterfaces, &filters(), IndicatorOptions::default()),
            cache_key(IndicatorId::ControlInterfaces, &other, IndicatorOptions::new(false, 3))
        );
        assert_ne!(
            cache_key(IndicatorId::OcGeneradas, &filters(), IndicatorOptions::default()),
            cache_key(IndicatorId::OcGeneradas, &other, IndicatorOptions::default())
        );
    }

    #[test]
    fn render_cycle_rejects_skipped_phases() {
        let mut cycle = RenderCycle::new(IndicatorId::OcGeneradas);
        assert!(!cycle.advance(RenderPhase::Rendering));
        assert!(cycle.advance(RenderPhase::FetchingFilters));
        assert!(cycle.advance(RenderPhase::QueryingCache));
        assert!(cycle.advance(RenderPhase::Rendering));
        assert!(cycle.advance(RenderPhase::Idle));
        assert_eq!(
            cycle.history(),
            &[
                RenderPhase::Idle,
                RenderPhase::FetchingFilters,
                RenderPhase::QueryingCache,
                RenderPhase::Rendering,
                RenderPhase::Idle,
            ]
        );
    }

    #[tokio::test]
    async fn oc_page_renders_series_and_ranking() {
        let shell = shell();
        let session = shell.session(None);
        let page = IndicatorPage::new(Arc::clone(&shell), service(FakeRepo::new(ranking)));

        let options = default_options(IndicatorId::OcGeneradas);
        let outcome = page
            .render(session, IndicatorId::OcGeneradas, options, |data| {
                data.panels
                    .iter()
                    .map(|panel| (panel.indicator.id, panel.options.top_n()))
                    .collect::<Vec<_>>()
            })
            .await;

        match outcome {
            RenderOutcome::Rendered(panels) => assert_eq!(
                panels,
                vec![
                    (IndicatorId::OcGeneradas, OC_PAGE_TOP_N),
                    (IndicatorId::RankingCompradores, OC_PAGE_TOP_N),
                ]
            ),
            RenderOutcome::Superseded => panic!("nothing changed the filters"),
        }
    }

    #[tokio::test]
    async fn filter_change_mid_fetch_supersedes_the_render() {
        let shell = shell();
        let session = shell.session(None);
        let repo = FakeRepo::new(ranking);
        {
            let shell = Arc::clone(&shell);
            *repo.on_fetch.lock().expect("hook lock") = Some(Box::new(move || {
                let narrowed =
                    FilterSet::new(date!(2025 - 07 - 01), date!(2025 - 07 - 02), None, None)
                        .expect("valid");
                shell.update_filters(session, narrowed);
            }));
        }
        let page = IndicatorPage::new(Arc::clone(&shell), service(Arc::clone(&repo)));

        let mut rendered = false;
        let outcome = page
            .render(session, IndicatorId::RankingCompradores, IndicatorOptions::default(), |_| {
                rendered = true;
            })
            .await;

        assert!(matches!(outcome, RenderOutcome::Superseded));
        assert!(!rendered);
        assert_eq!(repo.calls(), 1);

        // The stale fetch still populated the cache under its own key.
        page.service()
            .rows(IndicatorId::RankingCompradores, &filters(), IndicatorOptions::default())
            .await
            .expect("cached rows");
        assert_eq!(repo.calls(), 1);
    }
}
