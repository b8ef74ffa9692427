use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use triage_core::TriageError;

// ---------------------------------------------------------------------------
// Sentinels for explicit 400 / 404
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }
}

fn triage_status(e: &TriageError) -> StatusCode {
    match e {
        TriageError::GraphNotFound(_) => StatusCode::NOT_FOUND,
        TriageError::InvalidGraph { .. } | TriageError::Config(_) => StatusCode::BAD_REQUEST,
        TriageError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TriageError::GraphStoreUnavailable(_)
        | TriageError::CollectorUnavailable { .. }
        | TriageError::OracleFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        TriageError::CollectorTimeout { .. } | TriageError::OracleTimeout(_) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        TriageError::Internal(_)
        | TriageError::Io(_)
        | TriageError::Yaml(_)
        | TriageError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<BadRequestError>().is_some() {
            StatusCode::BAD_REQUEST
        } else if self.0.downcast_ref::<NotFoundError>().is_some() {
            StatusCode::NOT_FOUND
        } else if let Some(e) = self.0.downcast_ref::<TriageError>() {
            triage_status(e)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
