use crate::cli::ServeArgs;
use crate::infra::{seat_rules, AppState, LoggingNotificationDispatcher};
use crate::routes::with_admissions_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use school_admissions::config::AppConfig;
use school_admissions::error::AppError;
use school_admissions::telemetry;
use school_admissions::workflows::admissions::{
    AdmissionsService, InMemoryAdmissionsStore, SystemClock,
};
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

    let rules = seat_rules(&config.admissions);
    let service = Arc::new(AdmissionsService::new(
        Arc::new(InMemoryAdmissionsStore::new()),
        Arc::new(LoggingNotificationDispatcher),
        Arc::new(rules),
        Arc::new(SystemClock),
        config.admissions.scheduling.clone(),
    ));

    let app = with_admissions_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        utc_offset_minutes = config.admissions.scheduling.utc_offset_minutes,
        "admissions scheduler ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
