//! Tollgate API Server Entry Point
//!
//! Bootstraps configuration, connects the configured store and starts the
//! Axum HTTP server.

use std::net::SocketAddr;

use tollgate_api::telemetry::{init_tracing, TelemetryConfig};
use tollgate_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use tollgate_core::TollgateConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let tollgate_config = TollgateConfig::from_env();
    let api_config = ApiConfig::from_env();
    let addr = resolve_bind_addr(&api_config)?;
    let backend = api_config.backend;

    let state = AppState::connect(tollgate_config, api_config).await?;
    let app = create_api_router(state);

    tracing::info!(%addr, %backend, "Starting Tollgate API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::system_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::system_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn resolve_bind_addr(config: &ApiConfig) -> ApiResult<SocketAddr> {
    let addr = config.bind_addr();
    addr.parse::<SocketAddr>().map_err(|e| {
        ApiError::request_param_error(format!("Invalid bind address {}: {}", addr, e))
    })
}
