use thiserror::Error;
use triage_core::evidence::CollectorError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },

    #[error("{backend} query failed: {message}")]
    Query {
        backend: &'static str,
        message: String,
    },

    #[error("failed to decode {backend} response: {message}")]
    Decode {
        backend: &'static str,
        message: String,
    },

    #[error("client config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<ClientError> for CollectorError {
    fn from(e: ClientError) -> Self {
        match &e {
            ClientError::Http(err) if err.is_timeout() => CollectorError::Timeout,
            ClientError::Http(_) | ClientError::Status { .. } | ClientError::Config(_) => {
                CollectorError::Unavailable(e.to_string())
            }
            ClientError::Query { .. } | ClientError::Decode { .. } => {
                CollectorError::PartialData(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_unavailable_and_decode_to_partial() {
        let status = ClientError::Status {
            backend: "loki",
            status: 503,
            body: "not ready".into(),
        };
        assert!(matches!(
            CollectorError::from(status),
            CollectorError::Unavailable(m) if m.contains("503")
        ));

        let decode = ClientError::Decode {
            backend: "prometheus",
            message: "expected value".into(),
        };
        assert!(matches!(
            CollectorError::from(decode),
            CollectorError::PartialData(_)
        ));
    }
}
