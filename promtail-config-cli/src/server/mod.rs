pub mod config;
mod routes;
mod state;
pub mod store;

use std::sync::Arc;

use axum::routing::{get, put};
use axum::Router;
use promtail_config_lib::{FlushOutcome, PeriodicHandler, PersistedDocument, WorkloadResource};
use tracing::{error, info, warn};

use self::config::{BackendKind, ServiceConfig};
use self::routes::{
    handle_delete_workload, handle_document, handle_health, handle_put_workload,
};
use self::state::AppState;

/// Command-line values for `serve`; each one overrides the config file and
/// the environment.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub backend: Option<BackendKind>,
    pub data_dir: Option<String>,
}

impl ServeOverrides {
    fn apply(self, config: &mut ServiceConfig) {
        if let Some(hostname) = self.hostname {
            config.server.hostname = hostname;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(namespace) = self.namespace {
            config.target.namespace = namespace;
        }
        if let Some(name) = self.name {
            config.target.name = name;
        }
        if let Some(kind) = self.backend {
            config.backend.kind = kind;
        }
        if let Some(data_dir) = self.data_dir {
            config.backend.data_dir = data_dir;
        }
    }
}

pub async fn run_serve(
    config_path: &str,
    overrides: ServeOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServiceConfig::load(config_path);
    config.apply_env_overrides();
    overrides.apply(&mut config);

    let target = config.target.document_target();
    let codec = config.target.codec()?;
    let objects = store::open_backend(&config.backend, &target).await?;

    let document = PersistedDocument::new(Arc::clone(&objects), target, codec)?;
    let handler = Arc::new(PeriodicHandler::start(config.handler.handler_config(), document).await?);
    let resource = WorkloadResource::new(objects, handler.clone());
    let state = Arc::new(AppState {
        handler: Arc::clone(&handler),
        resource,
    });

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/v1/document", get(handle_document))
        .route(
            "/v1/workloads",
            put(handle_put_workload).delete(handle_delete_workload),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.server.hostname, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind to {}: {}", addr, e))?;
    info!(
        addr = %addr,
        initial_delay_secs = config.handler.initial_delay_secs,
        period_secs = config.handler.period_secs,
        "Serving promtail config aggregation"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if config.handler.flush_on_shutdown {
        match handler.flush().await {
            FlushOutcome::Failed { error } => error!(error = %error, "Final flush failed"),
            outcome => info!(?outcome, "Final flush done"),
        }
    }
    handler.shutdown().await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, finishing in-flight requests");
}
