//! Alertmanager-style webhook ingestion.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

/// Inbound alert notification. Absent fields deserialize to empty values,
/// matching the tolerant shape of upstream webhook senders.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AlertPayload {
    pub status: String,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Alert {
    pub labels: AlertLabels,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AlertLabels {
    pub alertname: String,
}

/// Classify firing alerts by name. Log-only: no counters are mutated here.
pub fn ingest(payload: &AlertPayload) {
    if payload.status != "firing" {
        return;
    }
    for alert in &payload.alerts {
        match alert.labels.alertname.as_str() {
            "HighDiskUsage" => warn!("High disk usage alert received!"),
            "High500ErrorRate" => error!("High error rate alert received!"),
            name => info!(alertname = name, "unrecognized alert"),
        }
    }
}

/// `POST /webhook`: acknowledge the notification, or report a malformed
/// payload as a structured failure instead of an unhandled fault.
pub async fn receive_webhook(payload: Result<Json<AlertPayload>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(alert)) => {
            info!(
                status = alert.status,
                alerts = alert.alerts.len(),
                "alert received"
            );
            ingest(&alert);
            Json(json!({"status": "success"})).into_response()
        }
        Err(rejection) => {
            error!(error = %rejection, "webhook payload rejected");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": rejection.body_text()})),
            )
                .into_response()
        }
    }
}
