use axum::extract::{Path, State};
use axum::Json;
use triage_core::graph::ReferenceGraph;

use crate::error::AppError;
use crate::state::AppState;

/// GET /graphs — names of the stored reference graphs.
pub async fn list_graphs(State(app): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    let store = app.store.clone();
    let names = tokio::task::spawn_blocking(move || store.list_reference_graphs())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(names))
}

/// GET /graphs/{name}
pub async fn get_graph(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ReferenceGraph>, AppError> {
    let store = app.store.clone();
    let graph = tokio::task::spawn_blocking(move || store.load_reference_graph(&name))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(graph))
}
