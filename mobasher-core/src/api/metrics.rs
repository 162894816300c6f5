//! Per-request metrics: every request increments a request counter
//! labelled (method, path, status) and observes a latency histogram with
//! the same labels, registered the same way `worker::WorkerMetrics`
//! registers its stage counters.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::IntoResponse;
use prometheus::{HistogramVec, IntCounterVec, Registry};

use crate::api::server::AppState;
use crate::{Error, Result};

pub struct ApiMetrics {
    pub requests_total: IntCounterVec,
    pub request_duration: HistogramVec,
}

impl ApiMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            prometheus::Opts::new(
                "mobasher_api_requests_total",
                "Read API requests by method, path and status",
            ),
            &["method", "path", "status"],
        )
        .map_err(|e| Error::Other(e.to_string()))?;
        let request_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "mobasher_api_request_duration_seconds",
                "Read API request latency by method, path and status",
            ),
            &["method", "path", "status"],
        )
        .map_err(|e| Error::Other(e.to_string()))?;
        registry
            .register(Box::new(requests_total.clone()))
            .map_err(|e| Error::Other(e.to_string()))?;
        registry
            .register(Box::new(request_duration.clone()))
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self {
            requests_total,
            request_duration,
        })
    }
}

/// Axum middleware observing every request. The matched route pattern (not
/// the raw path with its ids) is used as the `path` label to keep
/// cardinality bounded.
pub async fn track_metrics(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> impl IntoResponse {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    let labels = [method.as_str(), path.as_str(), status.as_str()];

    state.metrics.requests_total.with_label_values(&labels).inc();
    state
        .metrics
        .request_duration
        .with_label_values(&labels)
        .observe(started.elapsed().as_secs_f64());

    response
}
