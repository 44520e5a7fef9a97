//! HTTP plumbing: request counting, panic boundary, CORS and flash cookies.

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::middleware;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::any::Any;
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tracing::{error, warn};

use crate::config::FLASH_COOKIE_NAME;
use crate::metrics::AppMetrics;

/// Overrides the status recorded in `http_requests_total` for one response.
///
/// The upload handler answers the too-large cutoff with a redirect but
/// accounts it as 413; inserting this extension keeps that mapping with the
/// outcome instead of spreading it into the middleware.
#[derive(Clone, Copy, Debug)]
pub struct MetricStatus(pub u16);

/// Middleware recording every request into the labeled request counter.
///
/// Wraps the core handler call and records the outcome uniformly, replacing
/// per-handler bookkeeping. Redirect-style outcomes count as 200; a handler
/// can pin a different status through [`MetricStatus`].
pub async fn track_requests(
    Extension(metrics): Extension<Arc<AppMetrics>>,
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();
    let response = next.run(request).await;
    let status = recorded_status(&response);
    metrics
        .http_requests
        .with_label_values(&[&method, &endpoint, &status.to_string()])
        .inc();
    response
}

fn recorded_status(response: &Response) -> u16 {
    match response.extensions().get::<MetricStatus>() {
        Some(MetricStatus(code)) => *code,
        None if response.status().is_redirection() => 200,
        None => response.status().as_u16(),
    }
}

/// Outermost fault boundary: a panicking handler becomes a counted, logged
/// 500 instead of a dropped connection. The process never dies from a
/// request.
pub fn handle_panic(metrics: &AppMetrics, err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic".to_string()
    };
    metrics.error_500_total.inc();
    error!(panic = %detail, "unhandled fault in request handler");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// Queue a one-shot flash message shown on the next form render.
pub fn flash(jar: CookieJar, message: &str) -> CookieJar {
    jar.add(
        Cookie::build((FLASH_COOKIE_NAME, message.to_string()))
            .path("/")
            .build(),
    )
}

/// Build a CORS layer from a comma separated origin list.
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = cors_origins?
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(AnyOrigin)
            .allow_headers(AnyOrigin),
    )
}

/// Client IP from `x-forwarded-for`, falling back to the connection address.
pub fn resolve_client_ip(headers: &HeaderMap, connect_ip: Option<IpAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .and_then(|value| value.parse::<IpAddr>().ok())
        .or(connect_ip)
}
