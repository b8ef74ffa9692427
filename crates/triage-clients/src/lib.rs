//! Concrete collaborators of the triage orchestrator: Prometheus and Loki
//! backed evidence collectors, and an LLM-backed analysis oracle.

pub mod collectors;
pub mod error;
pub mod loki;
pub mod oracle;
pub mod prometheus;
pub mod prompt;
pub mod queries;

pub use error::{ClientError, Result};

use collectors::{InfraCollector, LogsCollector, MetricsCollector, TraceCollector};
use loki::LokiClient;
use oracle::LlmOracle;
use prometheus::PrometheusClient;
use std::sync::Arc;
use std::time::Duration;
use triage_core::config::TriageConfig;
use triage_core::orchestrator::Collaborators;
use triage_core::store::GraphStore;

/// Telemetry backends, kept around for health probes.
#[derive(Clone)]
pub struct Backends {
    pub prometheus: PrometheusClient,
    pub loki: LokiClient,
}

pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .user_agent(concat!("triage/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Wire the HTTP collaborators described by `config` around `store`.
pub fn build(config: &TriageConfig, store: Arc<dyn GraphStore>) -> Result<(Collaborators, Backends)> {
    let http = http_client()?;
    let endpoints = &config.endpoints;
    let subjects = config
        .subject_regex()
        .map_err(|e| ClientError::Config(e.to_string()))?;

    let backends = Backends {
        prometheus: PrometheusClient::new(http.clone(), &endpoints.prometheus_url),
        loki: LokiClient::new(http.clone(), &endpoints.loki_url),
    };
    let namespace = &endpoints.core_namespace;

    let collaborators = Collaborators {
        store,
        infra: Arc::new(InfraCollector::new(
            backends.prometheus.clone(),
            namespace,
            config.infra.clone(),
        )),
        metrics: Arc::new(MetricsCollector::new(backends.prometheus.clone())),
        logs: Arc::new(LogsCollector::new(
            backends.loki.clone(),
            namespace,
            subjects.clone(),
        )),
        traces: Arc::new(TraceCollector::new(backends.loki.clone(), namespace, subjects)),
        oracle: Arc::new(LlmOracle::from_config(http, endpoints)),
    };
    Ok((collaborators, backends))
}
