use crate::cli::ServeArgs;
use crate::infra::{seed_roster, AppState};
use crate::routes::with_drive_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;
use vaxdrive::config::AppConfig;
use vaxdrive::drives::{DriveService, MemoryStore, SqliteStore, SystemClock, VaccinationStore};
use vaxdrive::error::AppError;
use vaxdrive::telemetry;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    match config.storage.database_path.clone() {
        Some(path) => {
            info!(path = %path.display(), "opening sqlite store");
            let store = Arc::new(SqliteStore::open(&path)?);
            serve(store, config, args.seed_demo).await
        }
        None => {
            info!("no APP_DATABASE_PATH set; using in-memory store");
            serve(Arc::new(MemoryStore::new()), config, args.seed_demo).await
        }
    }
}

async fn serve<S>(store: Arc<S>, config: AppConfig, seed_demo: bool) -> Result<(), AppError>
where
    S: VaccinationStore + 'static,
{
    if seed_demo {
        let seeded = seed_roster(store.as_ref())?;
        info!(students = seeded, "demo roster loaded");
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let drive_service = Arc::new(DriveService::new(
        store,
        Arc::new(SystemClock),
        config.scheduling.lead_days,
    ));

    let app = with_drive_routes(drive_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        lead_days = config.scheduling.lead_days,
        "vaccination drive service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
