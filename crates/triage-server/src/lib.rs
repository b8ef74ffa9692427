pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::health::index))
        .route("/health", get(routes::health::health))
        // Alertmanager ingress
        .route("/webhook", post(routes::webhook::receive_alerts))
        // Incidents and reports
        .route("/incidents", get(routes::incidents::list_incidents))
        .route("/incidents/{id}", get(routes::incidents::get_incident))
        // Reference graphs
        .route("/graphs", get(routes::graphs::list_graphs))
        .route("/graphs/{name}", get(routes::graphs::get_graph))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve on a pre-bound listener until `shutdown` resolves.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    app_state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("triage server listening on http://{addr}");

    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
