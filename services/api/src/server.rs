use crate::cli::ServeArgs;
use crate::infra::{load_catalog, seed_detectives, AppState};
use crate::routes::with_platform_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use detective_visibility::cache::TtlCache;
use detective_visibility::clock::{Clock, SystemClock};
use detective_visibility::config::AppConfig;
use detective_visibility::error::AppError;
use detective_visibility::service::{spawn_expiry_sweeper, VisibilityService};
use detective_visibility::store::MemoryStore;
use detective_visibility::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(MemoryStore::default());
    let packages = load_catalog(args.catalog_csv.as_deref(), &store)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    if args.seed_demo_data {
        let seeded = seed_detectives(&store, clock.now());
        info!(count = seeded.len(), "seeded sample detectives");
    }

    let cache = Arc::new(TtlCache::new(clock.clone()));
    let service = Arc::new(VisibilityService::new(
        store.clone(),
        store,
        cache,
        clock,
        &config.engine,
    ));
    let sweeper = spawn_expiry_sweeper(service.clone(), config.engine.expiry_sweep_interval);

    let app = with_platform_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        packages,
        sweep_interval_secs = config.engine.expiry_sweep_interval.as_secs(),
        "detective visibility engine ready"
    );

    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;
    Ok(())
}
