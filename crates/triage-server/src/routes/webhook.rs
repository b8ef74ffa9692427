use axum::extract::State;
use axum::Json;
use serde::Serialize;
use triage_core::procedure::{AlertStatus, AlertmanagerPayload};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    /// "accepted" when at least one firing alert was received, else "skipped".
    pub status: &'static str,
    pub message: String,
    pub alerts_received: usize,
    /// Incidents started by this notification.
    pub incident_ids: Vec<String>,
    /// Running incidents cancelled by resolved alerts.
    pub cancelled: Vec<String>,
}

/// POST /webhook — Alertmanager receiver.
///
/// Every firing alert starts an incident unless one is already running for
/// the same alert identity. Resolved alerts cancel their running incident.
pub async fn receive_alerts(
    State(app): State<AppState>,
    Json(payload): Json<AlertmanagerPayload>,
) -> Result<Json<WebhookResponse>, AppError> {
    if payload.alerts.is_empty() {
        return Err(AppError::bad_request("No alerts in payload"));
    }
    let alerts_received = payload.alerts.len();
    tracing::info!(
        receiver = %payload.receiver,
        status = ?payload.status,
        alerts = alerts_received,
        "webhook received"
    );

    let mut incident_ids = Vec::new();
    let mut cancelled = Vec::new();
    let mut firing = 0usize;
    for alert in payload.alerts {
        match alert.status {
            AlertStatus::Resolved => {
                if let Some(id) = app.registry.cancel(&alert.identity()) {
                    tracing::info!(incident_id = %id, alertname = %alert.alertname(), "alert resolved, cancelling incident");
                    cancelled.push(id);
                }
            }
            AlertStatus::Firing => {
                firing += 1;
                let alertname = alert.alertname().to_string();
                match app.orchestrator.spawn(&app.registry, alert) {
                    Some(id) => {
                        tracing::info!(incident_id = %id, %alertname, "incident started");
                        incident_ids.push(id);
                    }
                    None => {
                        tracing::debug!(%alertname, "incident already running for alert");
                    }
                }
            }
        }
    }

    let response = if firing == 0 {
        WebhookResponse {
            status: "skipped",
            message: format!("No firing alerts; cancelled {} incident(s)", cancelled.len()),
            alerts_received,
            incident_ids,
            cancelled,
        }
    } else {
        WebhookResponse {
            status: "accepted",
            message: format!(
                "Started {} incident(s) for {firing} firing alert(s)",
                incident_ids.len()
            ),
            alerts_received,
            incident_ids,
            cancelled,
        }
    };
    Ok(Json(response))
}
