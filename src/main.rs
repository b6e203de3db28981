//! OCPP Bridge
//!
//! OCPP 1.6 WebSocket server for EV charge points, backed by the internal
//! business API. Reads configuration from TOML (~/.config/ocpp-bridge/config.toml).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ocpp_bridge::application::{
    ocpp16_schemas, CommandSender, SessionEngine, SessionRegistry, SessionStore,
};
use ocpp_bridge::config::{AppConfig, LoggingConfig, MetricsConfig};
use ocpp_bridge::infrastructure::HttpBackendApi;
use ocpp_bridge::interfaces::OcppServer;
use ocpp_bridge::support::ShutdownCoordinator;
use ocpp_bridge::default_config_path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("OCPP_BRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let app_cfg = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            init_logging(&cfg.logging);
            if config_path.exists() {
                info!("Configuration loaded from {}", config_path.display());
            } else {
                info!("No config file at {}, using defaults", config_path.display());
            }
            cfg
        }
        Err(e) => {
            init_logging(&LoggingConfig::default());
            error!("Failed to load config {}: {}", config_path.display(), e);
            return Err(e.into());
        }
    };

    info!("Starting OCPP bridge...");

    // ── Prometheus exporter ────────────────────────────────────
    install_metrics(&app_cfg.metrics);

    // ── Backend gateway ────────────────────────────────────────
    let backend = Arc::new(HttpBackendApi::new(&app_cfg.backend)?);
    info!(base_url = app_cfg.backend.base_url.as_str(), "Backend API configured");

    // ── Sessions, commands, engine ─────────────────────────────
    let schemas = Arc::new(ocpp16_schemas());
    let session_registry = SessionRegistry::shared();
    let session_store = SessionStore::shared();
    let command_sender = Arc::new(CommandSender::new(
        session_registry.clone(),
        schemas.clone(),
        app_cfg.server.call_timeout(),
    ));
    let engine = Arc::new(SessionEngine::new(
        backend.clone(),
        command_sender,
        session_store.clone(),
        app_cfg.session.clone(),
        app_cfg.charging_profile.clone(),
    ));
    let dispatcher = Arc::new(engine.dispatcher(schemas));

    // ── Graceful shutdown ──────────────────────────────────────
    let shutdown = ShutdownCoordinator::new(app_cfg.server.shutdown_timeout_secs);
    shutdown.start_signal_listener();

    let server = OcppServer::new(
        app_cfg.server.clone(),
        app_cfg.backend.identity_check_attempts,
        backend,
        session_registry.clone(),
        dispatcher,
    )
    .with_session_store(session_store)
    .with_shutdown(shutdown.signal());

    info!("Server started. Press Ctrl+C to shutdown gracefully.");

    if let Err(e) = server.run().await {
        error!("WebSocket server error: {}", e);
        return Err(e);
    }

    // Connection tasks need a moment to flush their close frames.
    let drained = shutdown
        .run_cleanup(async {
            while session_registry.count() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        })
        .await;
    if !drained {
        warn!(
            remaining = session_registry.count(),
            "Connections still open after grace period"
        );
    }

    info!("OCPP bridge shutdown complete");
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    if cfg.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn install_metrics(cfg: &MetricsConfig) {
    if !cfg.enabled {
        return;
    }
    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(listen = cfg.listen.as_str(), error = %e, "Invalid metrics address, exporter disabled");
            return;
        }
    };
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => info!(%addr, "Prometheus exporter listening"),
        Err(e) => warn!(error = %e, "Failed to install Prometheus exporter"),
    }
}
