use axum::extract::{Path, State};
use axum::Json;
use triage_core::orchestrator::IncidentRecord;

use crate::error::AppError;
use crate::state::AppState;

/// GET /incidents — known incidents, newest first.
pub async fn list_incidents(State(app): State<AppState>) -> Json<Vec<IncidentRecord>> {
    Json(app.registry.list())
}

/// GET /incidents/{id} — one incident, with its final report once finished.
pub async fn get_incident(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IncidentRecord>, AppError> {
    app.registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("incident '{id}' not found")))
}

