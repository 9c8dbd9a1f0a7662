use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};

use masterbus_metrics::aggregation::{AggregationConfig, FacilityAggregator, MetricsService};
use masterbus_metrics::api::{self, AppState};
use masterbus_metrics::cache::CacheSettings;
use masterbus_metrics::cli::Cli;
use masterbus_metrics::config::Config;
use masterbus_metrics::db;
use masterbus_metrics::error::AppError;
use masterbus_metrics::logging::init_logging;
use masterbus_metrics::maintenance::run_cache_maintenance;
use masterbus_metrics::metrics::AppMetrics;
use masterbus_metrics::repository::FacilityRepository;
use masterbus_metrics::store::FacilityStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::from_env()
        .and_then(|config| config.apply_cli(&cli))
        .map_err(AppError::Config)
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            std::process::exit(1);
        });

    tracing::info!("Service started with config: {:?}", config);

    if let Err(err) = run(config).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let metrics = Arc::new(AppMetrics::new()?);

    let mut store = FacilityStore::new();
    let repository = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            let repository = FacilityRepository::new(pool);
            let summary = repository.load_into(&mut store).await?;
            tracing::info!(
                facilities = summary.facilities,
                equipment = summary.equipment,
                maintenance_records = summary.maintenance_records,
                skipped = summary.skipped,
                "Store hydrated from database"
            );
            Some(Arc::new(repository))
        }
        None => {
            tracing::info!("DATABASE_URL not set; facility data is held in memory only");
            None
        }
    };
    let store = Arc::new(RwLock::new(store));

    let aggregator = FacilityAggregator::new(
        store.clone(),
        AggregationConfig::default().with_default_window(config.default_window),
    );
    let service = MetricsService::new(
        aggregator,
        CacheSettings {
            ttl: config.cache_ttl,
            capacity: config.cache_capacity,
        },
    )
    .with_metrics(metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = tokio::spawn(run_cache_maintenance(
        service.clone(),
        config.cache_sweep_interval,
        shutdown_rx,
    ));

    let app = api::create_router(AppState {
        service: service.clone(),
        store,
        repository,
        metrics,
    });

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|err| AppError::Server(format!("failed to bind {}: {}", address, err)))?;
    tracing::info!("Listening on {}", address);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Server(err.to_string()));

    let _ = shutdown_tx.send(true);
    if let Err(err) = maintenance.await {
        tracing::warn!("Cache maintenance task ended abnormally: {}", err);
    }
    service.shutdown().await;

    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received. Draining connections.");
}
