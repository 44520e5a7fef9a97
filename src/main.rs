//! dropspot server binary.
//!
//! Accepts file uploads gated by a storage quota, exposes Prometheus metrics
//! for scraping, and receives alert webhook callbacks. The main entry point
//! builds the Axum router, wires the shared state, and runs the listener
//! until shutdown.

mod admission;
mod alerts;
mod config;
mod error;
mod frontend;
mod http;
mod logging;
mod metrics;
mod storage;
mod upload;
mod usage;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::Args;
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::metrics::AppMetrics;
use crate::storage::Storage;
use crate::upload::UploadConfig;
use crate::usage::UsageMeter;

/// Starts the dropspot server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;
    let usage = Arc::new(UsageMeter::new(
        PathBuf::from(&args.storage_dir),
        args.capacity_bytes,
    ));
    let metrics = Arc::new(AppMetrics::new().map_err(std::io::Error::other)?);
    let upload_config = Arc::new(UploadConfig {
        max_upload_bytes: args.max_upload_bytes,
    });

    let panic_metrics = metrics.clone();
    let mut app = Router::new()
        .route("/", get(frontend::upload_form).post(upload::upload_file))
        .route("/metrics", get(metrics::get_metrics))
        .route("/webhook", post(alerts::receive_webhook))
        .route("/test500", get(metrics::test_500))
        .layer(DefaultBodyLimit::max(args.max_upload_bytes as usize))
        .layer(CatchPanicLayer::custom(
            move |err: Box<dyn std::any::Any + Send + 'static>| {
                http::handle_panic(&panic_metrics, err)
            },
        ))
        .layer(middleware::from_fn(http::track_requests))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(usage))
        .layer(Extension(metrics))
        .layer(Extension(upload_config));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("starting http server at {addr}");
    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
