//! API server setup: `ApiServerConfig`/`AppState` + `axum::serve`. Every
//! field on `AppState` is always present here, since one `Runtime` is built
//! before the API is ever started.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::metrics::ApiMetrics;
use crate::api::routes;
use crate::runtime::Runtime;
use crate::Result;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub metrics: Arc<ApiMetrics>,
    pub start_time: Instant,
}

/// Binds and serves the Read API until the runtime's shutdown token fires.
pub async fn serve(runtime: Arc<Runtime>, config: ApiServerConfig) -> Result<()> {
    let metrics = Arc::new(ApiMetrics::register(&runtime.metrics_registry)?);
    let state = AppState {
        runtime: runtime.clone(),
        metrics,
        start_time: Instant::now(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = routes::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| crate::Error::config(format!("invalid API bind address: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "read API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(runtime.shutdown.clone().cancelled_owned())
        .await?;

    Ok(())
}
