/*
 * 5D Labs Agent Platform - Alert Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Alert Controller Service
//!
//! - Watches `ClusterAlert`, `ProjectAlert` and `Notifier` resources and publishes
//!   the compiled Alertmanager routing config
//! - Reconciles rule state against Alertmanager's live alerts and silences
//! - Watches restart-rate targets and fires alerts
//! - Serves health and readiness endpoints

use alert_controller::tasks::{run_alert_controller, ControllerConfig, StateSynchronizer};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Clone)]
struct AppState {
    state_sync: Arc<StateSynchronizer>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        "Starting 5D Labs Alert Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_controller_config();
    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;
    let config = Arc::new(config);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();
    let state_sync =
        run_alert_controller(client, config.clone(), shutdown.clone(), tasks.clone()).await?;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .with_state(AppState { state_sync });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("Alert controller HTTP server listening on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop controllers, polling loops and pending reload cycles
    shutdown.cancel();
    tasks.close();
    tasks.wait().await;
    info!("Alert controller stopped");

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,alert_controller=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

fn load_controller_config() -> ControllerConfig {
    let override_path = std::env::var("ALERT_CONTROLLER_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or(DEFAULT_CONFIG_PATH);

    match ControllerConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded controller configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            ControllerConfig::default()
        }
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "alert-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.state_sync.is_ready() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "alert-controller",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
