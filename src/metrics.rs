//! Prometheus counters and gauges shared across request handlers.

use axum::extract::Extension;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::error;

use crate::usage::UsageMeter;

/// Counter and gauge set for the server.
///
/// Backed by an explicitly-owned registry shared via `Arc`, not a process
/// global. Every update is atomic inside the prometheus crate, so increments
/// are never lost under concurrent handlers.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub upload_total: IntCounter,
    pub upload_failed: IntCounter,
    pub error_500_total: IntCounter,
    pub disk_usage_percent: Gauge,
}

impl AppMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests.clone()))?;

        let upload_total = IntCounter::new("upload_total", "Total number of uploads")?;
        registry.register(Box::new(upload_total.clone()))?;

        let upload_failed = IntCounter::new("upload_failed", "Number of failed uploads")?;
        registry.register(Box::new(upload_failed.clone()))?;

        let error_500_total =
            IntCounter::new("app_error_500_total", "Total number of 500 errors")?;
        registry.register(Box::new(error_500_total.clone()))?;

        let disk_usage_percent = Gauge::new("disk_usage_percent", "Disk usage in percent")?;
        registry.register(Box::new(disk_usage_percent.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            upload_total,
            upload_failed,
            error_500_total,
            disk_usage_percent,
        })
    }

    /// Encode every registered metric in the text exposition format.
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// `GET /metrics`: recompute the disk usage gauge, then expose all samples.
///
/// The gauge is overwritten only here; between scrapes it keeps the last
/// scraped value.
pub async fn get_metrics(
    Extension(metrics): Extension<Arc<AppMetrics>>,
    Extension(usage): Extension<Arc<UsageMeter>>,
) -> Response {
    let percent = match usage.percent().await {
        Ok(value) => value,
        Err(err) => {
            error!(error = %err, "metrics collection failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Metrics collection failed",
            )
                .into_response();
        }
    };
    metrics.disk_usage_percent.set(percent);

    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!(error = %err, "metrics encoding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Metrics collection failed",
            )
                .into_response()
        }
    }
}

/// `GET /test500`: diagnostic hook that forces a counted 500 response.
pub async fn test_500(Extension(metrics): Extension<Arc<AppMetrics>>) -> Response {
    metrics.error_500_total.inc();
    error!("Test 500 error triggered");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
