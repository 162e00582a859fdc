use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transient_router::audit::{AuditSink, ObjectStoreAuditSink, PgAuditSink};
use transient_router::config::{AuditSinkKind, Config};
use transient_router::storage::{ObjectStorage, S3ObjectStorage};
use transient_router::webhook::{start_api_server, AppState};
use transient_router::{EventKafkaConsumer, TransientRouter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        project = %config.routing.project_id,
        output_container = %config.routing.output_container,
        "Starting transient router"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let storage: Arc<dyn ObjectStorage> = Arc::new(
        S3ObjectStorage::new(&config.storage)
            .await
            .context("Failed to initialize object storage")?,
    );

    let audit_sink: Arc<dyn AuditSink> = match config.audit.sink {
        AuditSinkKind::ObjectStore => Arc::new(ObjectStoreAuditSink::new(
            storage.clone(),
            config.routing.output_container.clone(),
            config.routing.project_id.clone(),
        )),
        AuditSinkKind::Postgres => {
            let sink = PgAuditSink::new(&config.audit)
                .await
                .context("Failed to initialize audit database")?;
            if config.audit.run_migrations {
                sink.run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            Arc::new(sink)
        }
    };

    let router = Arc::new(TransientRouter::new(
        Arc::new(config.routing.clone()),
        storage,
        audit_sink,
        config.audit.environment.clone(),
    ));

    let shutdown = CancellationToken::new();

    // Spawn Kafka consumer task
    let consumer_handle = match config.kafka {
        Some(ref kafka_config) => {
            let consumer = EventKafkaConsumer::new(kafka_config, router.clone())
                .context("Failed to initialize Kafka consumer")?;
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = consumer.run(token).await {
                    error!(error = %e, "Kafka consumer error");
                }
            }))
        }
        None => None,
    };

    // Spawn webhook server task
    let api_config = config.api.clone();
    let api_state = AppState { router };
    let token = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, token).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Transient router started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down transient router");
    shutdown.cancel();

    if let Err(e) = api_handle.await {
        error!(error = %e, "API server task failed");
    }
    if let Some(handle) = consumer_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Kafka consumer task failed");
        }
    }

    info!("Transient router stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
