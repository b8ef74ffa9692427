//! Loki `query_range` client returning flat [`LogEntry`] lines.

use crate::error::{ClientError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use triage_core::annotate::log_level;
use triage_core::evidence::LogEntry;

const BACKEND: &str = "loki";

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<StreamData>,
}

#[derive(Deserialize)]
struct StreamData {
    #[serde(default)]
    result: Vec<Stream>,
}

#[derive(Deserialize)]
struct Stream {
    #[serde(default)]
    stream: BTreeMap<String, String>,
    /// `[nanosecond timestamp as string, line]`
    #[serde(default)]
    values: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct LokiClient {
    http: reqwest::Client,
    base_url: String,
}

impl LokiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lines matching `logql` in `[start, end]` (unix seconds), oldest first.
    pub async fn query_range(
        &self,
        logql: &str,
        start: i64,
        end: i64,
        limit: u32,
        timeout: Duration,
    ) -> Result<Vec<LogEntry>> {
        let resp = self
            .http
            .get(format!("{}/loki/api/v1/query_range", self.base_url))
            .query(&[
                ("query", logql.to_string()),
                ("start", (start * 1_000_000_000).to_string()),
                ("end", (end * 1_000_000_000).to_string()),
                ("limit", limit.to_string()),
                ("direction", "forward".to_string()),
            ])
            .timeout(timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                backend: BACKEND,
                status: status.as_u16(),
                body,
            });
        }
        parse_streams(&body)
    }

    pub async fn ready(&self) -> bool {
        match self
            .http
            .get(format!("{}/ready", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "loki readiness probe failed");
                false
            }
        }
    }
}

fn parse_streams(body: &str) -> Result<Vec<LogEntry>> {
    let parsed: ApiResponse = serde_json::from_str(body).map_err(|e| ClientError::Decode {
        backend: BACKEND,
        message: e.to_string(),
    })?;
    if parsed.status != "success" {
        return Err(ClientError::Query {
            backend: BACKEND,
            message: parsed.status,
        });
    }

    let mut entries = Vec::new();
    for stream in parsed.data.map(|d| d.result).unwrap_or_default() {
        let pod = stream
            .stream
            .get("k8s_pod_name")
            .or_else(|| stream.stream.get("pod"))
            .cloned()
            .unwrap_or_default();
        for (ts, line) in stream.values {
            let Ok(nanos) = ts.parse::<i64>() else {
                tracing::debug!(ts, "skipping log line with unparseable timestamp");
                continue;
            };
            entries.push(LogEntry {
                timestamp: nanos / 1_000_000_000,
                level: log_level(&line).to_string(),
                message: line,
                pod: pod.clone(),
            });
        }
    }
    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(url: String) -> LokiClient {
        LokiClient::new(reqwest::Client::new(), url)
    }

    #[tokio::test]
    async fn streams_flatten_into_sorted_entries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/loki/api/v1/query_range")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "1700000000000000000".into()),
                Matcher::UrlEncoded("direction".into(), "forward".into()),
            ]))
            .with_body(
                r#"{"status":"success","data":{"resultType":"streams","result":[
                    {"stream":{"k8s_pod_name":"amf-7d9f"},
                     "values":[["1700000005000000000","ERROR registration rejected imsi-001010000000001"]]},
                    {"stream":{"pod":"ausf-0"},
                     "values":[["1700000001500000000","auth vector generated"],["bogus","x"]]}
                ]}}"#,
            )
            .create_async()
            .await;

        let entries = client(server.url())
            .query_range("{}", 1700000000, 1700000060, 100, Duration::from_secs(2))
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pod, "ausf-0");
        assert_eq!(entries[0].timestamp, 1700000001);
        assert_eq!(entries[0].level, "INFO");
        assert_eq!(entries[1].pod, "amf-7d9f");
        assert_eq!(entries[1].level, "ERROR");
    }

    #[tokio::test]
    async fn http_failure_is_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/loki/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let err = client(server.url())
            .query_range("{}", 0, 1, 10, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
    }

    #[test]
    fn malformed_body_is_decode_error() {
        assert!(matches!(
            parse_streams("not json"),
            Err(ClientError::Decode { .. })
        ));
    }
}
