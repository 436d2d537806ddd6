use crate::cli::ServeArgs;
use crate::infra::{
    default_catalog, AppState, CountdownFormProvider, InMemoryStepStore, InMemoryStorage,
    InstantPaymentProvider,
};
use crate::routes::with_enrollment_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use enroll_flow::config::AppConfig;
use enroll_flow::error::AppError;
use enroll_flow::telemetry;
use enroll_flow::workflows::enrollment::{
    BucketRoster, CsvProgramCatalog, EnrollmentService, GateConfig, ProgramCatalog,
};
use tracing::info;

fn load_catalog() -> Result<Arc<dyn ProgramCatalog>, AppError> {
    match std::env::var("ENROLL_PROGRAMS_CSV") {
        Ok(path) => {
            let file = std::fs::File::open(path)?;
            Ok(Arc::new(CsvProgramCatalog::from_reader(file)?))
        }
        Err(_) => Ok(Arc::new(default_catalog())),
    }
}

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

    let roster = BucketRoster::new(config.storage.buckets.clone());
    let gates = GateConfig {
        poll_interval: config.gates.poll_interval(),
        poll_ceiling: config.gates.poll_ceiling(),
    };

    let store = Arc::new(InMemoryStepStore::default());
    let storage = Arc::new(InMemoryStorage::new(roster.primary()));
    let payments = Arc::new(InstantPaymentProvider);
    let forms = Arc::new(CountdownFormProvider::completing_after(3));
    let catalog = load_catalog()?;

    let service = Arc::new(EnrollmentService::new(
        store,
        storage,
        payments,
        forms,
        catalog,
        roster,
        gates,
        config.gates.enrollment_fee_cents,
    ));

    let app = with_enrollment_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "enrollment progression service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
