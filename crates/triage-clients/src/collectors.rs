//! The four evidence collectors, backed by Prometheus and Loki.
//!
//! Each collector spreads its own queries concurrently and turns the replies
//! into the evidence type the orchestrator expects. A collector fails only
//! when none of its queries produced anything; individual query failures are
//! logged and skipped.

use crate::error::ClientError;
use crate::loki::LokiClient;
use crate::prometheus::{PromSeries, PrometheusClient};
use crate::queries;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use triage_core::annotate::{annotate_logs, build_trace, extract_subjects, PhaseMatcher};
use triage_core::config::InfraConfig;
use triage_core::evidence::{
    CollectorError, EvidenceKind, LogEntry, LogsEvidence, MetricSeries, MetricsEvidence,
    TraceEvidence,
};
use triage_core::infra::{InfraFindings, InfraMetrics, PodPhase, PodPhaseSample, PodSample};
use triage_core::orchestrator::{Collector, IncidentContext};

pub const DEFAULT_LOG_LIMIT: u32 = 5000;
pub const DEFAULT_MAX_SUBJECTS: usize = 20;
const METRICS_STEP_SECS: u64 = 15;

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Succeed with whatever came back, fail only if every query failed.
fn settle<T>(
    collector: EvidenceKind,
    results: Vec<Result<T, ClientError>>,
) -> Result<Vec<T>, CollectorError> {
    let total = results.len();
    let mut ok = Vec::with_capacity(total);
    let mut first_err = None;
    for result in results {
        match result {
            Ok(v) => ok.push(v),
            Err(e) => {
                tracing::warn!(collector = %collector, error = %e, "query failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) if ok.is_empty() => Err(e.into()),
        _ => Ok(ok),
    }
}

// ---------------------------------------------------------------------------
// Infra
// ---------------------------------------------------------------------------

pub struct InfraCollector {
    prometheus: PrometheusClient,
    namespace: String,
    config: InfraConfig,
}

impl InfraCollector {
    pub fn new(prometheus: PrometheusClient, namespace: impl Into<String>, config: InfraConfig) -> Self {
        Self {
            prometheus,
            namespace: namespace.into(),
            config,
        }
    }
}

fn pod_samples(series: &[PromSeries]) -> Vec<PodSample> {
    series
        .iter()
        .filter_map(|s| {
            let value = s.last().filter(|v| v.is_finite())?;
            Some(PodSample {
                pod: s.label("pod")?.to_string(),
                container: s.label("container").unwrap_or_default().to_string(),
                value,
            })
        })
        .collect()
}

fn phase_samples(series: &[PromSeries]) -> Vec<PodPhaseSample> {
    series
        .iter()
        .filter_map(|s| {
            Some(PodPhaseSample {
                pod: s.label("pod")?.to_string(),
                phase: PodPhase::parse(s.label("phase")?),
            })
        })
        .collect()
}

#[async_trait]
impl Collector for InfraCollector {
    type Output = InfraFindings;

    fn kind(&self) -> EvidenceKind {
        EvidenceKind::Infra
    }

    async fn fetch(
        &self,
        ctx: &IncidentContext,
        budget: Duration,
    ) -> Result<InfraFindings, CollectorError> {
        let q = queries::infra_queries(&self.namespace, &ctx.nfs);
        let at = ctx.window.end_secs();
        let prom = &self.prometheus;
        let (restarts, oom, status, memory, cpu) = futures::try_join!(
            prom.query(&q.restarts, at, budget),
            prom.query(&q.oom_kills, at, budget),
            prom.query(&q.pod_status, at, budget),
            prom.query(&q.memory_percent, at, budget),
            prom.query(&q.cpu_usage, at, budget),
        )?;

        let metrics = InfraMetrics {
            pod_restarts: pod_samples(&restarts),
            oom_kills: pod_samples(&oom),
            pod_status: phase_samples(&status),
            memory_percent: pod_samples(&memory),
            cpu_usage: pod_samples(&cpu),
        };
        let findings = InfraFindings::from_metrics(&metrics, &self.config);
        tracing::debug!(
            incident_id = %ctx.incident_id,
            score = findings.score,
            critical = findings.critical_events.len(),
            "infra findings"
        );
        Ok(findings)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

pub struct MetricsCollector {
    prometheus: PrometheusClient,
}

impl MetricsCollector {
    pub fn new(prometheus: PrometheusClient) -> Self {
        Self { prometheus }
    }
}

#[async_trait]
impl Collector for MetricsCollector {
    type Output = MetricsEvidence;

    fn kind(&self) -> EvidenceKind {
        EvidenceKind::Metrics
    }

    async fn fetch(
        &self,
        ctx: &IncidentContext,
        budget: Duration,
    ) -> Result<MetricsEvidence, CollectorError> {
        let (start, end) = (ctx.window.start_secs(), ctx.window.end_secs());
        let jobs = ctx.nfs.iter().flat_map(|nf| {
            queries::nf_metric_queries(nf)
                .into_iter()
                .map(move |(name, promql)| async move {
                    let series = self
                        .prometheus
                        .query_range(&promql, start, end, METRICS_STEP_SECS, budget)
                        .await?;
                    Ok::<_, ClientError>((nf.clone(), name, promql, series))
                })
        });
        let results = settle(EvidenceKind::Metrics, join_all(jobs).await)?;

        let mut evidence = MetricsEvidence::default();
        for (nf, name, promql, series) in results {
            let entry = evidence.by_nf.entry(nf).or_default();
            for s in series {
                let mut labels = s.labels;
                labels.insert("series".into(), name.to_string());
                entry.push(MetricSeries {
                    query: promql.clone(),
                    labels,
                    values: s.values,
                });
            }
        }
        Ok(evidence)
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

pub struct LogsCollector {
    loki: LokiClient,
    namespace: String,
    subject_pattern: Regex,
    limit: u32,
}

impl LogsCollector {
    pub fn new(loki: LokiClient, namespace: impl Into<String>, subject_pattern: Regex) -> Self {
        Self {
            loki,
            namespace: namespace.into(),
            subject_pattern,
            limit: DEFAULT_LOG_LIMIT,
        }
    }
}

fn phase_matcher(ctx: &IncidentContext) -> Option<PhaseMatcher> {
    let graph = ctx.graph.as_ref()?;
    match PhaseMatcher::new(graph) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(graph = %graph.name, error = %e, "keyword patterns unusable");
            None
        }
    }
}

#[async_trait]
impl Collector for LogsCollector {
    type Output = LogsEvidence;

    fn kind(&self) -> EvidenceKind {
        EvidenceKind::Logs
    }

    async fn fetch(
        &self,
        ctx: &IncidentContext,
        budget: Duration,
    ) -> Result<LogsEvidence, CollectorError> {
        let mut logql = Vec::new();
        for nf in &ctx.nfs {
            logql.push(queries::nf_error_log_query(&self.namespace, nf));
            if let Some(q) = ctx
                .graph
                .as_ref()
                .and_then(|g| queries::nf_phase_log_query(&self.namespace, nf, g))
            {
                logql.push(q);
            }
        }

        let (start, end) = (ctx.window.start_secs(), ctx.window.end_secs());
        let jobs = logql
            .iter()
            .map(|q| self.loki.query_range(q, start, end, self.limit, budget));
        let batches = settle(EvidenceKind::Logs, join_all(jobs).await)?;

        // Error and phase queries overlap.
        let mut seen = HashSet::new();
        let mut entries: Vec<LogEntry> = batches
            .into_iter()
            .flatten()
            .filter(|e| seen.insert((e.timestamp, e.pod.clone(), e.message.clone())))
            .collect();
        entries.sort_by_key(|e| e.timestamp);

        let matcher = phase_matcher(ctx);
        let evidence = LogsEvidence {
            by_nf: annotate_logs(&entries, matcher.as_ref()),
            subjects: extract_subjects(&entries, &self.subject_pattern),
        };
        tracing::debug!(
            incident_id = %ctx.incident_id,
            lines = entries.len(),
            subjects = evidence.subjects.len(),
            "logs collected"
        );
        Ok(evidence)
    }
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

pub struct TraceCollector {
    loki: LokiClient,
    namespace: String,
    subject_pattern: Regex,
    limit: u32,
    max_subjects: usize,
}

impl TraceCollector {
    pub fn new(loki: LokiClient, namespace: impl Into<String>, subject_pattern: Regex) -> Self {
        Self {
            loki,
            namespace: namespace.into(),
            subject_pattern,
            limit: DEFAULT_LOG_LIMIT,
            max_subjects: DEFAULT_MAX_SUBJECTS,
        }
    }

    pub fn with_max_subjects(mut self, max: usize) -> Self {
        self.max_subjects = max.max(1);
        self
    }

    async fn discover_subjects(
        &self,
        ctx: &IncidentContext,
        timeout: Duration,
    ) -> Result<Vec<String>, ClientError> {
        let q = queries::subject_discovery_query(&self.namespace, self.subject_pattern.as_str());
        let entries = self
            .loki
            .query_range(
                &q,
                ctx.window.start_secs(),
                ctx.window.end_secs(),
                self.limit,
                timeout,
            )
            .await?;
        Ok(extract_subjects(&entries, &self.subject_pattern))
    }
}

#[async_trait]
impl Collector for TraceCollector {
    type Output = TraceEvidence;

    fn kind(&self) -> EvidenceKind {
        EvidenceKind::Traces
    }

    async fn fetch(
        &self,
        ctx: &IncidentContext,
        budget: Duration,
    ) -> Result<TraceEvidence, CollectorError> {
        let deadline = Instant::now() + budget;
        let graph = ctx.graph.as_ref().ok_or_else(|| {
            CollectorError::PartialData(format!("reference graph {} unavailable", ctx.procedure))
        })?;
        let matcher =
            PhaseMatcher::new(graph).map_err(|e| CollectorError::PartialData(e.to_string()))?;

        let mut subjects = if ctx.subjects.is_empty() {
            self.discover_subjects(ctx, remaining(deadline)).await?
        } else {
            ctx.subjects.clone()
        };
        if subjects.len() > self.max_subjects {
            tracing::debug!(
                found = subjects.len(),
                kept = self.max_subjects,
                "capping trace subjects"
            );
            subjects.truncate(self.max_subjects);
        }
        if subjects.is_empty() {
            return Ok(TraceEvidence::default());
        }

        let (start, end) = (ctx.window.start_secs(), ctx.window.end_secs());
        let timeout = remaining(deadline);
        let matcher = &matcher;
        let jobs = subjects.iter().map(|subject| async move {
            let q = queries::subject_trace_query(&self.namespace, subject);
            let entries = self
                .loki
                .query_range(&q, start, end, self.limit, timeout)
                .await?;
            Ok::<_, ClientError>(build_trace(&ctx.incident_id, subject, &entries, matcher))
        });
        let traces = settle(EvidenceKind::Traces, join_all(jobs).await)?
            .into_iter()
            .filter(|t| {
                if t.events.is_empty() {
                    tracing::debug!(subject = %t.subject_id, "no step matched, dropping trace");
                }
                !t.events.is_empty()
            })
            .collect();
        Ok(TraceEvidence { traces })
    }
}
