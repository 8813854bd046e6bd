use std::{process, sync::Arc, time::Duration};

use connexa_monitor::{
    application::{
        error::AppError,
        indicator::IndicatorCache,
        repos::SourceProbe,
        shell::DashboardShell,
        sources::{SourceState, SourceStatusService},
    },
    cache::CacheConfig,
    config,
    infra::{
        db::{PostgresSources, ensure_monitor_objects},
        error::InfraError,
        http::{self, MonitorState},
        telemetry,
    },
    util::timezone::{DASHBOARD_TIMEZONE, today_in},
};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let command = cli_args
        .command
        .unwrap_or_else(config::Command::serve_default);

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::EnsureObjects(_) => run_ensure_objects(settings).await,
        config::Command::Probe(_) => run_probe(settings).await,
    }
}

fn connect(settings: &config::Settings) -> PostgresSources {
    PostgresSources::connect_lazy(&settings.postgres, settings.sqlserver.as_ref())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let sources = Arc::new(connect(&settings));

    if settings.dashboard.ensure_objects {
        match ensure_monitor_objects(sources.pool()).await {
            Ok(applied) => info!(statements = applied, "Monitor objects ensured"),
            Err(err) => warn!(
                error = %err,
                error_kind = err.kind(),
                "Could not ensure monitor objects; serving anyway"
            ),
        }
    }

    let cache_config = CacheConfig::from(&settings.cache);
    let sweep_interval = cache_config.sweep_interval;
    let cache = Arc::new(IndicatorCache::new(&cache_config));
    let shell = Arc::new(DashboardShell::new(|| today_in(DASHBOARD_TIMEZONE)));

    let state = MonitorState::new(
        sources.clone(),
        sources.clone(),
        Arc::clone(&cache),
        Arc::clone(&shell),
    );

    let sweeper = spawn_sweeper(cache, shell, sweep_interval);
    let result = serve_http(&settings, state).await;

    sweeper.abort();
    let _ = sweeper.await;
    sources.pool().close().await;

    result
}

fn spawn_sweeper(
    cache: Arc<IndicatorCache>,
    shell: Arc<DashboardShell>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            cache.purge_expired();
            shell.purge_idle();
        }
    })
}

async fn serve_http(settings: &config::Settings, state: MonitorState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let addr = settings.server.addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::from(InfraError::Bind { addr, source }))?;

    info!(%addr, "CONNEXA Monitor listening");

    let grace = settings.server.graceful_shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(grace))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!("CONNEXA Monitor stopped");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(grace_secs = grace.as_secs(), "Shutdown requested; draining connections");
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!("Graceful shutdown timed out; exiting");
        process::exit(0);
    });
}

async fn run_ensure_objects(settings: config::Settings) -> Result<(), AppError> {
    let sources = connect(&settings);
    let applied = ensure_monitor_objects(sources.pool()).await?;
    info!(statements = applied, "Monitor objects ensured");
    sources.pool().close().await;
    Ok(())
}

async fn run_probe(settings: config::Settings) -> Result<(), AppError> {
    let sources = Arc::new(connect(&settings));
    let probe: Arc<dyn SourceProbe> = sources.clone();
    let statuses = SourceStatusService::new(probe).all().await;
    sources.pool().close().await;

    for status in &statuses {
        info!(
            source = status.label,
            state = ?status.state,
            database = status.database.as_deref().unwrap_or(""),
            server_addr = status.server_addr.as_deref().unwrap_or(""),
            "Data source status"
        );
    }

    match statuses
        .iter()
        .find(|status| status.state == SourceState::Unreachable)
    {
        Some(status) => Err(AppError::from(InfraError::database(format!(
            "{} is unreachable",
            status.label
        )))),
        None => Ok(()),
    }
}
