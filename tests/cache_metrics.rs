use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use connexa_monitor::application::catalog::ResolvedQuery;
use connexa_monitor::application::indicator::{IndicatorCache, IndicatorService};
use connexa_monitor::application::repos::{KpiRepo, RepoError};
use connexa_monitor::cache::{CacheConfig, ManualClock, TtlCache};
use connexa_monitor::domain::filters::{FilterSet, IndicatorOptions};
use connexa_monitor::domain::indicators::IndicatorId;
use connexa_monitor::domain::rows::{IndicatorRows, RankingRow};
use connexa_monitor::infra::telemetry::describe_metrics;
use metrics_util::debugging::DebuggingRecorder;
use time::macros::date;

struct RankingRepo;

#[async_trait]
impl KpiRepo for RankingRepo {
    async fn fetch(&self, _query: &ResolvedQuery) -> Result<IndicatorRows, RepoError> {
        Ok(IndicatorRows::Ranking(vec![RankingRow {
            comprador: "GOMEZ".to_string(),
            oc_total: 7,
            bultos_total: 120.0,
        }]))
    }
}

#[tokio::test]
async fn cache_and_render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    describe_metrics();

    // Miss, hit, fetch error and purge on a bare cache.
    let clock = Arc::new(ManualClock::new());
    let cache: TtlCache<&'static str, u32> =
        TtlCache::with_clock(&CacheConfig::default(), clock.clone());
    cache
        .get_or_fetch("ok", || async { Ok::<_, String>(1) })
        .await
        .expect("fetch succeeds");
    cache
        .get_or_fetch("ok", || async { Ok::<_, String>(2) })
        .await
        .expect("cached value");
    let failed = cache
        .get_or_fetch("broken", || async { Err::<u32, _>("boom".to_string()) })
        .await;
    assert!(failed.is_err());
    clock.advance(std::time::Duration::from_secs(600));
    assert_eq!(cache.purge_expired(), 2);

    // Panel renders through the indicator service.
    let indicators = IndicatorService::new(
        Arc::new(RankingRepo),
        Arc::new(IndicatorCache::new(&CacheConfig::default())),
    );
    let filters = FilterSet::month_to_date(date!(2025 - 07 - 15));
    indicators
        .load(IndicatorId::RankingCompradores, &filters, IndicatorOptions::default())
        .await;
    indicators
        .load(IndicatorId::OcAprobadasSgm, &filters, IndicatorOptions::default())
        .await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "connexa_monitor_cache_hit_total",
        "connexa_monitor_cache_miss_total",
        "connexa_monitor_cache_fetch_error_total",
        "connexa_monitor_cache_entries",
        "connexa_monitor_indicator_render_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
