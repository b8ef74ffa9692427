use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// "healthy" when every checked dependency answered, else "degraded".
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loki: Option<bool>,
    pub running_incidents: usize,
}

/// GET /health
pub async fn health(State(app): State<AppState>) -> Json<HealthReport> {
    let store = app.store.health_check();
    let (prometheus, loki) = match &app.backends {
        Some(b) => {
            let (p, l) = tokio::join!(b.prometheus.ready(), b.loki.ready());
            (Some(p), Some(l))
        }
        None => (None, None),
    };

    let healthy = store && prometheus.unwrap_or(true) && loki.unwrap_or(true);
    Json(HealthReport {
        status: if healthy { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        store,
        prometheus,
        loki,
        running_incidents: app.registry.running_count(),
    })
}

/// GET / — service descriptor.
pub async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "triage",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
        "webhook": "/webhook",
        "incidents": "/incidents",
    }))
}
