//! Minimal Prometheus HTTP API client (`/api/v1/query`, `/api/v1/query_range`).

use crate::error::{ClientError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const BACKEND: &str = "prometheus";

/// One series of a query result. Instant queries carry a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct PromSeries {
    pub labels: BTreeMap<String, String>,
    /// `(unix seconds, value)` pairs in response order.
    pub values: Vec<(i64, f64)>,
}

impl PromSeries {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Most recent value, if any.
    pub fn last(&self) -> Option<f64> {
        self.values.last().map(|(_, v)| *v)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<RawSeries>,
}

#[derive(Deserialize)]
struct RawSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl RawSeries {
    fn into_series(self) -> PromSeries {
        let points = self.value.into_iter().chain(self.values);
        PromSeries {
            labels: self.metric,
            values: points
                .filter_map(|(ts, v)| v.parse::<f64>().ok().map(|v| (ts as i64, v)))
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
}

impl PrometheusClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Instant query evaluated at `at` (unix seconds).
    pub async fn query(&self, promql: &str, at: i64, timeout: Duration) -> Result<Vec<PromSeries>> {
        self.get(
            "/api/v1/query",
            &[("query", promql.to_string()), ("time", at.to_string())],
            timeout,
        )
        .await
    }

    pub async fn query_range(
        &self,
        promql: &str,
        start: i64,
        end: i64,
        step_secs: u64,
        timeout: Duration,
    ) -> Result<Vec<PromSeries>> {
        self.get(
            "/api/v1/query_range",
            &[
                ("query", promql.to_string()),
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("step", format!("{step_secs}s")),
            ],
            timeout,
        )
        .await
    }

    /// True when `/-/ready` answers 2xx.
    pub async fn ready(&self) -> bool {
        match self
            .http
            .get(format!("{}/-/ready", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "prometheus readiness probe failed");
                false
            }
        }
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Vec<PromSeries>> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(params)
            .timeout(timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        // Prometheus reports bad queries as 400/422 with an error body.
        if !status.is_success() && !(status.as_u16() == 400 || status.as_u16() == 422) {
            return Err(ClientError::Status {
                backend: BACKEND,
                status: status.as_u16(),
                body,
            });
        }
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Vec<PromSeries>> {
    let parsed: ApiResponse = serde_json::from_str(body).map_err(|e| ClientError::Decode {
        backend: BACKEND,
        message: e.to_string(),
    })?;
    if parsed.status != "success" {
        return Err(ClientError::Query {
            backend: BACKEND,
            message: parsed.error.unwrap_or_else(|| parsed.status.clone()),
        });
    }
    Ok(parsed
        .data
        .map(|d| d.result.into_iter().map(RawSeries::into_series).collect())
        .unwrap_or_default())
}
