//! Fanout Relay
//!
//! Accepts any HTTP request, resolves the instances of the target service and
//! broadcasts the request to all of them, answering with one selected response.
//!
//! ## Listeners
//!
//! - relay (`http.port`, `PORT`): catch-all broadcast route
//! - management (`http.management_port`): `/health/live`, `/health/ready`, `/metrics`
//!
//! Run with `--example-config` to print a documented configuration file.

use anyhow::{Context, Result};
use fo_config::{AppConfig, ConfigLoader};
use fo_registry::{KubernetesConfig, KubernetesRegistry, Registry, StaticRegistry};
use fo_relay::{
    create_management_router, create_relay_router, Dispatcher, HttpRelay, HttpRelayConfig,
    RelayState,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--example-config") {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    fo_common::logging::init_logging("fo-relay");

    info!("Starting Fanout Relay");

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;

    if config.target.service.is_empty() {
        warn!("No default service configured (ENDPOINT_NAME); requests must pass ?endpoint=");
    }

    let registry = build_registry(&config)?;

    let relay = HttpRelay::with_config(HttpRelayConfig {
        call_timeout: config.call_timeout(),
        connect_timeout: config.connect_timeout(),
        host_header: config.host_header(),
        ..Default::default()
    })?;

    let dispatcher = Dispatcher::new(Arc::new(relay))
        .with_pool_size(config.dispatch.pool_size)
        .with_selection(config.dispatch.selection);

    let prometheus = install_prometheus();

    let state = RelayState::new(registry.clone(), Arc::new(dispatcher))
        .with_default_target(config.target.namespace.clone(), config.target.service.clone())
        .with_max_body_bytes(config.http.max_body_bytes);

    let relay_app = create_relay_router(state).layer(TraceLayer::new_for_http());
    let management_app = create_management_router(prometheus).layer(TraceLayer::new_for_http());

    let relay_addr = format!("{}:{}", config.http.host, config.http.port);
    let management_addr = format!("{}:{}", config.http.host, config.http.management_port);

    let relay_listener = TcpListener::bind(&relay_addr)
        .await
        .with_context(|| format!("Failed to bind relay listener on {}", relay_addr))?;
    let management_listener = TcpListener::bind(&management_addr)
        .await
        .with_context(|| format!("Failed to bind management listener on {}", management_addr))?;

    log_startup_summary(&config, registry.as_ref());

    let shutdown = CancellationToken::new();

    let relay_server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(relay_listener, relay_app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        })
    };
    let management_server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(management_listener, management_app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        })
    };

    shutdown_signal().await;
    info!("Shutdown signal received, draining connections");
    shutdown.cancel();

    for (name, server) in [("relay", relay_server), ("management", management_server)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(listener = name, error = %e, "Server error"),
            Err(e) => error!(listener = name, error = %e, "Server task failed"),
        }
    }

    info!("Fanout Relay stopped");
    Ok(())
}

fn build_registry(config: &AppConfig) -> Result<Arc<dyn Registry>> {
    match config.registry.kind.as_str() {
        "static" => {
            let registry = StaticRegistry::new();
            for service in &config.registry.static_services {
                let endpoints = service.parse_endpoints()?;
                info!(
                    namespace = %service.namespace,
                    name = %service.name,
                    endpoints = endpoints.len(),
                    "Registered static service"
                );
                registry.set_service(service.namespace.clone(), service.name.clone(), endpoints);
            }
            Ok(Arc::new(registry))
        }
        _ => {
            let kube = &config.registry.kubernetes;
            let kube_config = if kube.api_url.is_empty() {
                KubernetesConfig::infer().context("Failed to load Kubernetes configuration")?
            } else {
                KubernetesConfig::new(kube.api_url.clone()).with_token(kube.token.clone())
            };
            let registry =
                KubernetesRegistry::new(kube_config.with_request_timeout(config.registry_timeout()))?;
            Ok(Arc::new(registry))
        }
    }
}

fn install_prometheus() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder, /metrics will be empty");
            None
        }
    }
}

fn log_startup_summary(config: &AppConfig, registry: &dyn Registry) {
    info!("=== Fanout Relay Startup Summary ===");
    info!("  Relay: {}:{}", config.http.host, config.http.port);
    info!("  Management: {}:{}", config.http.host, config.http.management_port);
    info!("  Registry: {}", registry.kind());
    info!(
        "  Default target: {}/{}",
        config.target.namespace, config.target.service
    );
    info!(
        "  Pool size: {}, selection: {}",
        config.dispatch.pool_size.max(1),
        config.dispatch.selection
    );
    match config.call_timeout() {
        Some(timeout) => info!("  Call timeout: {}ms", timeout.as_millis()),
        None => info!("  Call timeout: disabled"),
    }
    info!("====================================");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
