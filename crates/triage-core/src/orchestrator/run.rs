//! The incident run: collect, compare, analyze, gate, finalize.

use super::collaborators::{Collaborators, Collector, IncidentContext, TimeWindow};
use super::registry::IncidentRegistry;
use super::report::{
    FinalReport, ReportParts, REASON_ANALYSIS_FAILED, REASON_ANALYSIS_TIMEOUT, REASON_CANCELLED,
};
use super::state::{
    confidence_gate, effective_threshold, ExecutionState, GateDecision, IncidentState, Phase,
    PhaseStatus,
};
use crate::config::{CollectionMode, TriageConfig};
use crate::deviation::unobserved_mandatory_steps;
use crate::error::{Result, TriageError};
use crate::evidence::{
    CollectorError, CollectorFailureRecord, EvidenceBundle, EvidenceKind, LogsEvidence,
    MetricsEvidence, SubjectDeviation, TraceEvidence,
};
use crate::graph::ReferenceGraph;
use crate::infra::InfraFindings;
use crate::procedure::{map_procedure, Alert, ProcedureMapping};
use crate::store::GraphStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

type Outcome<T> = std::result::Result<T, CollectorError>;

// ---------------------------------------------------------------------------
// Incident
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Incident {
    pub id: String,
    pub alert: Alert,
}

impl Incident {
    pub fn new(alert: Alert) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert,
        }
    }
}

struct Collected {
    infra: Option<InfraFindings>,
    metrics: Option<MetricsEvidence>,
    logs: Option<LogsEvidence>,
    traces: Option<TraceEvidence>,
    failures: Vec<CollectorFailureRecord>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    collaborators: Collaborators,
    config: Arc<TriageConfig>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: Arc<TriageConfig>) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Drive `incident` to its terminal report.
    ///
    /// Collector, store and oracle failures degrade the report. Only an
    /// inconsistency in the run's own state is returned as an error. The
    /// incident's captured traces are removed from the store in every case.
    pub async fn run(&self, incident: Incident, cancel: CancellationToken) -> Result<FinalReport> {
        let span = info_span!(
            "incident",
            incident_id = %incident.id,
            alertname = %incident.alert.alertname()
        );
        async move {
            let outcome = self.drive(&incident, &cancel).await;

            let id = incident.id.clone();
            match blocking(&self.collaborators.store, move |s| s.cleanup_incident(&id)).await {
                Ok(removed) => debug!(removed, "captured traces cleaned up"),
                Err(e) => warn!(error = %e, "cleanup of captured traces failed"),
            }

            let (mut exec, parts) = outcome.inspect_err(|e| error!(error = %e, "incident aborted"))?;
            exec.transition(IncidentState::Done)?;
            let report = FinalReport::assemble(&exec, parts);
            info!(
                attempts = report.attempt_count,
                confidence = report.confidence,
                degraded = report.degraded,
                "incident finalized"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Register the alert and run it in the background. Returns the new
    /// incident id, or `None` when the same alert is already running.
    pub fn spawn(self: &Arc<Self>, registry: &Arc<IncidentRegistry>, alert: Alert) -> Option<String> {
        let (incident, cancel) = registry.register(alert)?;
        let id = incident.id.clone();
        let orchestrator = Arc::clone(self);
        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            let identity = incident.alert.identity();
            let incident_id = incident.id.clone();
            match orchestrator.run(incident, cancel).await {
                Ok(report) => registry.complete(&identity, report),
                Err(e) => registry.fail(&identity, &incident_id, e.to_string()),
            }
        });
        Some(id)
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    /// Runs until `Finalizing`.
    async fn drive(
        &self,
        incident: &Incident,
        cancel: &CancellationToken,
    ) -> Result<(ExecutionState, ReportParts)> {
        let cfg = &self.config;
        let mut exec = ExecutionState::new(&incident.id, cfg.orchestrator.max_attempts);
        let (mapping, graph) = self.select_procedure(&incident.alert).await;
        let nfs = incident_nfs(&incident.alert, graph.as_ref());
        info!(
            procedure = %mapping.graph,
            method = %mapping.method,
            graph_loaded = graph.is_some(),
            "incident started"
        );

        let mut parts = ReportParts {
            alertname: incident.alert.alertname().to_string(),
            procedure: mapping.graph.clone(),
            mapping_method: mapping.method,
            analysis: None,
            infra_score: 0.0,
            deviations: Vec::new(),
            collector_failures: Vec::new(),
        };

        loop {
            if cancel.is_cancelled() {
                return finalize_cancelled(exec, parts);
            }
            exec.transition(IncidentState::Collecting)?;
            exec.reset_phases();
            let attempt = exec.attempt_count;

            let ctx = IncidentContext {
                incident_id: incident.id.clone(),
                alert: incident.alert.clone(),
                procedure: mapping.graph.clone(),
                graph: graph.clone(),
                nfs: nfs.clone(),
                window: self.window(&incident.alert, attempt),
                attempt,
                subjects: Vec::new(),
            };
            debug!(
                attempt,
                start = %ctx.window.start,
                end = %ctx.window.end,
                "collecting evidence"
            );

            let collected = self.collect(&mut exec, ctx, cancel).await;
            if cancel.is_cancelled() {
                return finalize_cancelled(exec, parts);
            }
            parts.collector_failures.extend(collected.failures);

            let mut bundle = EvidenceBundle {
                procedure: mapping.graph.clone(),
                graph: graph.clone(),
                infra: collected.infra,
                metrics: collected.metrics,
                logs: collected.logs,
                traces: collected.traces,
                deviations: Vec::new(),
                evidence_quality: 0.0,
                time_window: format!(
                    "alert_time - {}s to alert_time + {}s",
                    self.window_before(attempt),
                    cfg.orchestrator.window_after_secs
                ),
            };
            exec.evidence_quality_score = bundle.categories().quality(&cfg.evidence_quality);
            bundle.evidence_quality = exec.evidence_quality_score;
            if let Some(infra) = &bundle.infra {
                parts.infra_score = infra.score;
            }

            bundle.deviations = self
                .detect_deviations(&mut exec, &incident.id, &mapping, graph.as_ref(), &bundle)
                .await;
            parts.deviations = bundle.deviations.clone();

            exec.transition(IncidentState::Analyzing)?;
            if !self.analyze(&mut exec, &mut parts, &bundle, cancel).await {
                if cancel.is_cancelled() {
                    return finalize_cancelled(exec, parts);
                }
                exec.transition(IncidentState::Finalizing)?;
                return Ok((exec, parts));
            }

            exec.needs_more_evidence =
                exec.confidence < effective_threshold(exec.evidence_quality_score, &cfg.gate);
            match confidence_gate(
                exec.evidence_quality_score,
                exec.confidence,
                exec.attempt_count,
                exec.max_attempts,
                &cfg.gate,
            ) {
                GateDecision::Retry => {
                    info!(
                        attempt,
                        confidence = exec.confidence,
                        evidence_quality = exec.evidence_quality_score,
                        "confidence gate: retrying with a wider window"
                    );
                    exec.begin_retry()?;
                }
                GateDecision::Finalize => {
                    exec.transition(IncidentState::Finalizing)?;
                    return Ok((exec, parts));
                }
            }
        }
    }

    async fn select_procedure(&self, alert: &Alert) -> (ProcedureMapping, Option<ReferenceGraph>) {
        let store = &self.collaborators.store;
        let available = blocking(store, |s| s.list_reference_graphs())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not list reference graphs");
                Vec::new()
            });
        let mapping = map_procedure(alert, &self.config.procedures, &available);
        let name = mapping.graph.clone();
        let graph = match blocking(store, move |s| s.load_reference_graph(&name)).await {
            Ok(g) => Some(g),
            Err(e) => {
                warn!(graph = %mapping.graph, error = %e, "reference graph unavailable");
                None
            }
        };
        (mapping, graph)
    }

    fn window_before(&self, attempt: u32) -> i64 {
        let o = &self.config.orchestrator;
        o.window_before_secs + i64::from(attempt.saturating_sub(1)) * o.retry_window_expansion_secs
    }

    fn window(&self, alert: &Alert, attempt: u32) -> TimeWindow {
        TimeWindow::around(
            alert.starts_at,
            self.window_before(attempt),
            self.config.orchestrator.window_after_secs,
        )
    }

    // -----------------------------------------------------------------------
    // COLLECTING
    // -----------------------------------------------------------------------

    /// Fan out the four collectors and join them all.
    async fn collect(
        &self,
        exec: &mut ExecutionState,
        ctx: IncidentContext,
        cancel: &CancellationToken,
    ) -> Collected {
        let budget = self.config.orchestrator.collector_timeout();
        let c = &self.collaborators;
        let ctx = Arc::new(ctx);
        let mut failures = Vec::new();

        exec.set_phase(Phase::Infra, PhaseStatus::Running);
        let infra = spawn_collector(Arc::clone(&c.infra), Arc::clone(&ctx), budget, cancel);
        exec.set_phase(Phase::Metrics, PhaseStatus::Running);
        let metrics = spawn_collector(Arc::clone(&c.metrics), Arc::clone(&ctx), budget, cancel);

        let (logs, traces) = match self.config.orchestrator.collection_mode {
            CollectionMode::Parallel => {
                exec.set_phase(Phase::Logs, PhaseStatus::Running);
                exec.set_phase(Phase::Traces, PhaseStatus::Running);
                let logs = spawn_collector(Arc::clone(&c.logs), Arc::clone(&ctx), budget, cancel);
                let traces =
                    spawn_collector(Arc::clone(&c.traces), Arc::clone(&ctx), budget, cancel);
                let logs = settle(exec, &mut failures, EvidenceKind::Logs, join(logs).await);
                let traces = settle(exec, &mut failures, EvidenceKind::Traces, join(traces).await);
                (logs, traces)
            }
            CollectionMode::Chained => {
                exec.set_phase(Phase::Logs, PhaseStatus::Running);
                let logs = spawn_collector(Arc::clone(&c.logs), Arc::clone(&ctx), budget, cancel);
                let logs = settle(exec, &mut failures, EvidenceKind::Logs, join(logs).await);

                let mut trace_ctx = (*ctx).clone();
                if let Some(l) = &logs {
                    trace_ctx.subjects = l.subjects.clone();
                }
                exec.set_phase(Phase::Traces, PhaseStatus::Running);
                let traces =
                    spawn_collector(Arc::clone(&c.traces), Arc::new(trace_ctx), budget, cancel);
                let traces = settle(exec, &mut failures, EvidenceKind::Traces, join(traces).await);
                (logs, traces)
            }
        };

        let metrics = settle(exec, &mut failures, EvidenceKind::Metrics, join(metrics).await);
        let infra = settle(exec, &mut failures, EvidenceKind::Infra, join(infra).await);

        Collected {
            infra,
            metrics,
            logs,
            traces,
            failures,
        }
    }

    /// Ingest each constructed trace and compare it against the procedure
    /// graph. The whole pass runs as one blocking task.
    async fn detect_deviations(
        &self,
        exec: &mut ExecutionState,
        incident_id: &str,
        mapping: &ProcedureMapping,
        graph: Option<&ReferenceGraph>,
        bundle: &EvidenceBundle,
    ) -> Vec<SubjectDeviation> {
        let Some(traces) = &bundle.traces else {
            exec.set_phase(Phase::Deviation, PhaseStatus::Failed);
            return Vec::new();
        };
        exec.set_phase(Phase::Deviation, PhaseStatus::Running);

        let pass = {
            let incident_id = incident_id.to_string();
            let graph_name = mapping.graph.clone();
            let traces = traces.traces.clone();
            blocking(&self.collaborators.store, move |store| {
                Ok(traces
                    .iter()
                    .map(|trace| {
                        let subject = trace.subject_id.as_str();
                        store
                            .ingest_captured_trace(&incident_id, subject, &trace.events)
                            .and_then(|()| store.detect_deviation(&incident_id, subject, &graph_name))
                            .map_err(|e| e.to_string())
                    })
                    .collect::<Vec<_>>())
            })
            .await
        };
        let results = match pass {
            Ok(results) => results,
            Err(e) => vec![Err(e.to_string()); traces.traces.len()],
        };

        let mut degraded = false;
        let mut out = Vec::with_capacity(traces.traces.len());
        for (trace, result) in traces.traces.iter().zip(results) {
            let subject = trace.subject_id.as_str();
            let unobserved = graph
                .map(|g| unobserved_mandatory_steps(g, trace))
                .unwrap_or_default();

            match result {
                Ok(r) => {
                    if let Some(d) = r.deviation() {
                        info!(
                            subject,
                            deviation_point = d.deviation_point,
                            expected = %d.expected_action,
                            actual = %d.actual_action,
                            "trace deviates from reference"
                        );
                    }
                    out.push(SubjectDeviation {
                        subject_id: subject.to_string(),
                        result: Some(r),
                        error: None,
                        unobserved_mandatory_steps: unobserved,
                    });
                }
                Err(e) => {
                    warn!(subject, error = %e, "deviation check degraded");
                    degraded = true;
                    out.push(SubjectDeviation {
                        subject_id: subject.to_string(),
                        result: None,
                        error: Some(e),
                        unobserved_mandatory_steps: unobserved,
                    });
                }
            }
        }
        let status = if degraded {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Done
        };
        exec.set_phase(Phase::Deviation, status);
        out
    }

    // -----------------------------------------------------------------------
    // ANALYZING
    // -----------------------------------------------------------------------

    /// Call the oracle once. Returns `false` when the run must finalize
    /// without consulting the gate (timeout, failure, or cancellation).
    async fn analyze(
        &self,
        exec: &mut ExecutionState,
        parts: &mut ReportParts,
        bundle: &EvidenceBundle,
        cancel: &CancellationToken,
    ) -> bool {
        let budget = self.config.orchestrator.oracle_timeout();
        exec.set_phase(Phase::Analysis, PhaseStatus::Running);

        let answer = tokio::select! {
            _ = cancel.cancelled() => return false,
            r = tokio::time::timeout(budget, self.collaborators.oracle.analyze(bundle, budget)) => {
                r.unwrap_or(Err(TriageError::OracleTimeout(budget)))
            }
        };

        match answer {
            Ok(mut analysis) => {
                analysis.confidence = clamp_confidence(analysis.confidence);
                exec.set_phase(Phase::Analysis, PhaseStatus::Done);
                exec.confidence = analysis.confidence;
                info!(
                    attempt = exec.attempt_count,
                    layer = %analysis.layer,
                    root_cause = %analysis.root_cause,
                    confidence = analysis.confidence,
                    "analysis complete"
                );
                parts.analysis = Some(analysis);
                true
            }
            Err(e) => {
                exec.set_phase(Phase::Analysis, PhaseStatus::Failed);
                exec.needs_more_evidence = false;
                let reason = match e {
                    TriageError::OracleTimeout(_) => REASON_ANALYSIS_TIMEOUT,
                    _ => REASON_ANALYSIS_FAILED,
                };
                warn!(error = %e, reason, "analysis unavailable, finalizing degraded");
                exec.degrade(reason);
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn finalize_cancelled(
    mut exec: ExecutionState,
    parts: ReportParts,
) -> Result<(ExecutionState, ReportParts)> {
    info!(state = %exec.state, "incident cancelled");
    for status in exec.phase_statuses.values_mut() {
        if *status == PhaseStatus::Running {
            *status = PhaseStatus::Failed;
        }
    }
    exec.degrade(REASON_CANCELLED);
    exec.transition(IncidentState::Finalizing)?;
    Ok((exec, parts))
}

/// Run a store call on the blocking pool. Redb commits sync to disk.
async fn blocking<T, F>(store: &Arc<dyn GraphStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn GraphStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| TriageError::GraphStoreUnavailable(format!("store task failed: {e}")))?
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// NFs named by the alert followed by the graph's actors, lowercase, deduplicated.
fn incident_nfs(alert: &Alert, graph: Option<&ReferenceGraph>) -> Vec<String> {
    let mut nfs = alert.affected_nfs();
    for actor in graph.map(|g| g.actors()).unwrap_or_default() {
        let actor = actor.to_lowercase();
        if !nfs.contains(&actor) {
            nfs.push(actor);
        }
    }
    nfs
}

/// Run one collector on its own task under its own timeout. Cancellation
/// abandons the fetch.
fn spawn_collector<T: Send + 'static>(
    collector: Arc<dyn Collector<Output = T>>,
    ctx: Arc<IncidentContext>,
    budget: Duration,
    cancel: &CancellationToken,
) -> JoinHandle<Outcome<T>> {
    let cancel = cancel.child_token();
    tokio::spawn(
        async move {
            debug!(collector = %collector.kind(), "fetch started");
            tokio::select! {
                _ = cancel.cancelled() => Err(CollectorError::Unavailable("cancelled".into())),
                r = tokio::time::timeout(budget, collector.fetch(&ctx, budget)) => {
                    r.unwrap_or(Err(CollectorError::Timeout))
                }
            }
        }
        .in_current_span(),
    )
}

async fn join<T>(handle: JoinHandle<Outcome<T>>) -> Outcome<T> {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Err(CollectorError::Unavailable(format!("collector task failed: {e}"))),
    }
}

fn settle<T>(
    exec: &mut ExecutionState,
    failures: &mut Vec<CollectorFailureRecord>,
    kind: EvidenceKind,
    outcome: Outcome<T>,
) -> Option<T> {
    match outcome {
        Ok(v) => {
            exec.set_phase(kind.into(), PhaseStatus::Done);
            Some(v)
        }
        Err(e) => {
            warn!(collector = %kind, error = %e, "collector failed, continuing with partial evidence");
            exec.set_phase(kind.into(), PhaseStatus::Failed);
            failures.push(CollectorFailureRecord::new(kind, exec.attempt_count, &e));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deviation::DeviationResult;
    use crate::evidence::{AnnotatedLog, MetricSeries};
    use crate::graph::tests::step;
    use crate::graph::{CapturedTrace, Event};
    use crate::orchestrator::collaborators::{Analysis, AnalysisOracle};
    use crate::procedure::AlertStatus;
    use crate::store::{GraphStore, MemoryGraphStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    // --- fakes ---

    struct FakeCollector<T> {
        kind: EvidenceKind,
        outcome: Outcome<T>,
        delay: Duration,
        seen: Mutex<Vec<IncidentContext>>,
    }

    impl<T> FakeCollector<T> {
        fn new(kind: EvidenceKind, outcome: Outcome<T>) -> Self {
            Self {
                kind,
                outcome,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn seen(&self) -> Vec<IncidentContext> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> Collector for FakeCollector<T> {
        type Output = T;

        fn kind(&self) -> EvidenceKind {
            self.kind
        }

        async fn fetch(&self, ctx: &IncidentContext, _budget: Duration) -> Outcome<T> {
            self.seen.lock().unwrap().push(ctx.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }
    }

    struct FakeOracle {
        answers: Mutex<VecDeque<Result<Analysis>>>,
        delay: Duration,
        calls: AtomicU32,
        qualities: Mutex<Vec<f64>>,
    }

    impl FakeOracle {
        fn new(answers: Vec<Result<Analysis>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
                qualities: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisOracle for FakeOracle {
        async fn analyze(&self, bundle: &EvidenceBundle, _budget: Duration) -> Result<Analysis> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.qualities.lock().unwrap().push(bundle.evidence_quality);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.answers.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(analysis(0.9, false)))
        }
    }

    // --- fixtures ---

    fn analysis(confidence: f64, needs_more_evidence: bool) -> Analysis {
        Analysis {
            layer: "application".into(),
            root_cause: "AUSF".into(),
            failure_mode: Some("authentication failure".into()),
            confidence,
            needs_more_evidence,
            evidence_chain: Vec::new(),
            reasoning: None,
        }
    }

    fn alert() -> Alert {
        Alert {
            status: AlertStatus::Firing,
            labels: [("alertname", "RegistrationFailures"), ("nf", "amf")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: BTreeMap::new(),
            starts_at: Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap(),
            ends_at: None,
            generator_url: String::new(),
            fingerprint: "fp-1".into(),
        }
    }

    fn metrics() -> MetricsEvidence {
        MetricsEvidence {
            by_nf: [(
                "amf".to_string(),
                vec![MetricSeries {
                    query: "up".into(),
                    labels: BTreeMap::new(),
                    values: vec![(0, 1.0)],
                }],
            )]
            .into_iter()
            .collect(),
        }
    }

    fn logs() -> LogsEvidence {
        LogsEvidence {
            by_nf: [(
                "ausf".to_string(),
                vec![AnnotatedLog {
                    timestamp: 1,
                    level: "ERROR".into(),
                    message: "Authentication FAILED imsi-001010000000001".into(),
                    matched_step: Some(2),
                    matched_pattern: Some("*authentication*".into()),
                }],
            )]
            .into_iter()
            .collect(),
            subjects: vec!["001010000000001".into()],
        }
    }

    fn traces() -> TraceEvidence {
        let ev = |order: i64, action: &str| Event {
            order,
            actor: "AUSF".into(),
            action: action.into(),
            timestamp: order,
        };
        TraceEvidence {
            traces: vec![CapturedTrace::new(
                "",
                "001010000000001",
                vec![ev(1, "Registration Request received"), ev(2, "Authentication FAILED")],
            )],
        }
    }

    struct Harness {
        store: Arc<MemoryGraphStore>,
        infra: Arc<FakeCollector<InfraFindings>>,
        metrics: Arc<FakeCollector<MetricsEvidence>>,
        logs: Arc<FakeCollector<LogsEvidence>>,
        traces: Arc<FakeCollector<TraceEvidence>>,
        oracle: Arc<FakeOracle>,
        config: TriageConfig,
    }

    impl Harness {
        fn new(oracle: FakeOracle) -> Self {
            let store = Arc::new(MemoryGraphStore::new());
            store
                .put_reference_graph(&ReferenceGraph::new(
                    "Registration_General",
                    "test",
                    vec![
                        step(1, "UE", "Registration Request"),
                        step(2, "AUSF", "Authentication/Security"),
                        step(3, "AMF", "Registration Accept"),
                    ],
                ))
                .unwrap();
            let mut config = TriageConfig::default();
            config.orchestrator.collector_timeout_secs = 1;
            config.orchestrator.oracle_timeout_secs = 2;
            Self {
                store,
                infra: Arc::new(FakeCollector::new(
                    EvidenceKind::Infra,
                    Ok(InfraFindings {
                        score: 0.2,
                        ..Default::default()
                    }),
                )),
                metrics: Arc::new(FakeCollector::new(EvidenceKind::Metrics, Ok(metrics()))),
                logs: Arc::new(FakeCollector::new(EvidenceKind::Logs, Ok(logs()))),
                traces: Arc::new(FakeCollector::new(EvidenceKind::Traces, Ok(traces()))),
                oracle: Arc::new(oracle),
                config,
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(
                Collaborators {
                    store: self.store.clone(),
                    infra: self.infra.clone(),
                    metrics: self.metrics.clone(),
                    logs: self.logs.clone(),
                    traces: self.traces.clone(),
                    oracle: self.oracle.clone(),
                },
                Arc::new(self.config.clone()),
            )
        }

        async fn run(&self) -> (String, FinalReport) {
            let incident = Incident::new(alert());
            let id = incident.id.clone();
            let report = self
                .orchestrator()
                .run(incident, CancellationToken::new())
                .await
                .unwrap();
            (id, report)
        }
    }

    // --- tests ---

    #[tokio::test]
    async fn confident_first_attempt_finalizes_with_deviation() {
        let h = Harness::new(FakeOracle::new(vec![Ok(analysis(0.9, false))]));
        let (id, report) = h.run().await;

        assert_eq!(report.incident_id, id);
        assert_eq!(report.attempt_count, 1);
        assert!(!report.degraded);
        assert_eq!(report.evidence_quality_score, 0.95);
        assert_eq!(report.infra_score, 0.2);
        assert_eq!(report.confidence, 0.9);
        assert_eq!(report.root_cause.as_deref(), Some("AUSF"));
        assert_eq!(report.procedure, "Registration_General");
        assert_eq!(h.oracle.calls(), 1);

        let dev = &report.deviations[0];
        assert_eq!(dev.subject_id, "001010000000001");
        let d = dev.result.as_ref().and_then(DeviationResult::deviation).unwrap();
        assert_eq!(d.deviation_point, 2);
        assert_eq!(d.expected_action, "Authentication/Security");
        assert_eq!(d.actual_action, "Authentication FAILED");
        assert_eq!(dev.unobserved_mandatory_steps, vec![3]);

        // Cleanup ran after finalizing.
        assert!(h.store.captured_subjects(&id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn low_confidence_retries_once_with_wider_window() {
        let h = Harness::new(FakeOracle::new(vec![
            Ok(analysis(0.5, false)),
            Ok(analysis(0.9, false)),
        ]));
        let (_, report) = h.run().await;

        assert_eq!(report.attempt_count, 2);
        assert_eq!(report.confidence, 0.9);
        assert_eq!(h.oracle.calls(), 2);

        let seen = h.infra.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].attempt, 1);
        assert_eq!(seen[1].attempt, 2);
        assert_eq!(
            (seen[0].window.start - seen[1].window.start).num_seconds(),
            300
        );
        assert_eq!(seen[0].window.end, seen[1].window.end);
    }

    #[tokio::test]
    async fn confident_answer_asking_for_more_evidence_finalizes() {
        let h = Harness::new(FakeOracle::new(vec![
            Ok(analysis(0.72, true)),
            Ok(analysis(0.9, false)),
        ]));
        let (_, report) = h.run().await;

        assert_eq!(report.attempt_count, 1);
        assert_eq!(report.confidence, 0.72);
        assert_eq!(h.oracle.calls(), 1);
        assert_eq!(h.infra.seen().len(), 1);
    }

    #[tokio::test]
    async fn oracle_calls_never_exceed_max_attempts() {
        let mut h = Harness::new(FakeOracle::new(
            (0..10).map(|_| Ok(analysis(0.1, true))).collect(),
        ));
        let (_, report) = h.run().await;
        assert_eq!(report.attempt_count, 2);
        assert_eq!(h.oracle.calls(), 2);
        assert_eq!(report.confidence, 0.1);
        assert!(!report.degraded);

        h.oracle = Arc::new(FakeOracle::new(
            (0..10).map(|_| Ok(analysis(0.1, true))).collect(),
        ));
        h.config.orchestrator.max_attempts = 3;
        let (_, report) = h.run().await;
        assert_eq!(report.attempt_count, 3);
        assert_eq!(h.oracle.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn collector_timeout_degrades_evidence_not_incident() {
        let mut h = Harness::new(FakeOracle::new(vec![Ok(analysis(0.7, false))]));
        h.metrics = Arc::new(
            FakeCollector::new(EvidenceKind::Metrics, Ok(metrics()))
                .delayed(Duration::from_secs(30)),
        );
        let (_, report) = h.run().await;

        // logs + traces: 0.85, threshold 0.65, so 0.7 finalizes.
        assert_eq!(report.evidence_quality_score, 0.85);
        assert_eq!(report.attempt_count, 1);
        assert!(!report.degraded);
        assert_eq!(report.collector_failures.len(), 1);
        assert_eq!(report.collector_failures[0].collector, EvidenceKind::Metrics);
        assert_eq!(report.collector_failures[0].kind, "timeout");
    }

    #[tokio::test]
    async fn unavailable_collectors_still_produce_a_report() {
        let mut h = Harness::new(FakeOracle::new(vec![Ok(analysis(0.3, false))]));
        h.config.orchestrator.max_attempts = 1;
        h.logs = Arc::new(FakeCollector::new(
            EvidenceKind::Logs,
            Err(CollectorError::Unavailable("connection refused".into())),
        ));
        h.traces = Arc::new(FakeCollector::new(
            EvidenceKind::Traces,
            Err(CollectorError::PartialData("bad payload".into())),
        ));
        let (_, report) = h.run().await;

        assert_eq!(report.evidence_quality_score, 0.40);
        assert!(report.deviations.is_empty());
        assert_eq!(report.collector_failures.len(), 2);
        assert_eq!(h.oracle.qualities.lock().unwrap()[0], 0.40);
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_timeout_finalizes_degraded_without_retry() {
        let mut oracle = FakeOracle::new(vec![Ok(analysis(0.1, true))]);
        oracle.delay = Duration::from_secs(60);
        let h = Harness::new(oracle);
        let (_, report) = h.run().await;

        assert!(report.degraded);
        assert_eq!(report.degraded_reason.as_deref(), Some(REASON_ANALYSIS_TIMEOUT));
        assert_eq!(report.attempt_count, 1);
        assert_eq!(report.layer, "unknown");
        assert_eq!(h.oracle.calls(), 1);
    }

    #[tokio::test]
    async fn oracle_failure_marks_analysis_failed() {
        let h = Harness::new(FakeOracle::new(vec![Err(TriageError::OracleFailed(
            "not json".into(),
        ))]));
        let (_, report) = h.run().await;
        assert!(report.degraded);
        assert_eq!(report.degraded_reason.as_deref(), Some(REASON_ANALYSIS_FAILED));
        assert_eq!(report.confidence, 0.0);
    }

    #[tokio::test]
    async fn oracle_timeout_on_retry_keeps_first_analysis() {
        let h = Harness::new(FakeOracle::new(vec![
            Ok(analysis(0.5, false)),
            Err(TriageError::OracleTimeout(Duration::from_secs(2))),
        ]));
        let (_, report) = h.run().await;
        assert_eq!(report.attempt_count, 2);
        assert!(report.degraded);
        assert_eq!(report.degraded_reason.as_deref(), Some(REASON_ANALYSIS_TIMEOUT));
        assert_eq!(report.confidence, 0.5);
        assert_eq!(report.root_cause.as_deref(), Some("AUSF"));
    }

    #[tokio::test]
    async fn confidence_out_of_range_is_clamped() {
        let h = Harness::new(FakeOracle::new(vec![Ok(analysis(1.7, false))]));
        let (_, report) = h.run().await;
        assert_eq!(report.confidence, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_collectors_and_cleans_up() {
        let mut h = Harness::new(FakeOracle::new(vec![]));
        h.config.orchestrator.collector_timeout_secs = 120;
        h.infra = Arc::new(
            FakeCollector::new(EvidenceKind::Infra, Ok(InfraFindings::default()))
                .delayed(Duration::from_secs(60)),
        );
        h.store
            .ingest_captured_trace("stale", "s", &[])
            .unwrap();

        let incident = Incident::new(alert());
        let id = incident.id.clone();
        h.store.ingest_captured_trace(&id, "s", &[]).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let report = h.orchestrator().run(incident, cancel).await.unwrap();

        assert!(report.degraded);
        assert_eq!(report.degraded_reason.as_deref(), Some(REASON_CANCELLED));
        assert_eq!(h.oracle.calls(), 0);
        assert!(report.collector_failures.is_empty());
        assert!(h.store.captured_subjects(&id).unwrap().is_empty());
        assert_eq!(h.store.captured_subjects("stale").unwrap(), vec!["s"]);
    }

    #[tokio::test]
    async fn cancelled_before_start_still_reports() {
        let h = Harness::new(FakeOracle::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = h
            .orchestrator()
            .run(Incident::new(alert()), cancel)
            .await
            .unwrap();
        assert_eq!(report.degraded_reason.as_deref(), Some(REASON_CANCELLED));
        assert!(h.infra.seen().is_empty());
    }

    #[tokio::test]
    async fn chained_mode_passes_log_subjects_to_traces() {
        let h = Harness::new(FakeOracle::new(vec![]));
        h.run().await;
        assert_eq!(h.traces.seen()[0].subjects, vec!["001010000000001"]);
        assert!(h.logs.seen()[0].subjects.is_empty());
    }

    #[tokio::test]
    async fn parallel_mode_leaves_discovery_to_traces() {
        let mut h = Harness::new(FakeOracle::new(vec![]));
        h.config.orchestrator.collection_mode = CollectionMode::Parallel;
        let (_, report) = h.run().await;
        assert!(h.traces.seen()[0].subjects.is_empty());
        assert_eq!(report.evidence_quality_score, 0.95);
    }

    #[tokio::test]
    async fn missing_graph_degrades_deviation_checks() {
        let h = Harness::new(FakeOracle::new(vec![]));
        let mut config = h.config.clone();
        config.procedures.fallback = "Nope".into();
        config.procedures.rules.clear();
        config.procedures.nf_defaults.clear();
        let orchestrator = Orchestrator::new(
            Collaborators {
                store: h.store.clone(),
                infra: h.infra.clone(),
                metrics: h.metrics.clone(),
                logs: h.logs.clone(),
                traces: h.traces.clone(),
                oracle: h.oracle.clone(),
            },
            Arc::new(config),
        );
        let report = orchestrator
            .run(Incident::new(alert()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.procedure, "Nope");
        let dev = &report.deviations[0];
        assert!(dev.result.is_none());
        assert!(dev.error.as_deref().unwrap().contains("Nope"));
        assert!(!report.degraded);
    }

    /// Delegates to a memory store and records which thread each call ran on.
    struct ThreadRecordingStore {
        inner: MemoryGraphStore,
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ThreadRecordingStore {
        fn record(&self) {
            self.threads.lock().unwrap().push(std::thread::current().id());
        }
    }

    impl GraphStore for ThreadRecordingStore {
        fn load_reference_graph(&self, name: &str) -> Result<ReferenceGraph> {
            self.record();
            self.inner.load_reference_graph(name)
        }

        fn put_reference_graph(&self, graph: &ReferenceGraph) -> Result<()> {
            self.record();
            self.inner.put_reference_graph(graph)
        }

        fn list_reference_graphs(&self) -> Result<Vec<String>> {
            self.record();
            self.inner.list_reference_graphs()
        }

        fn ingest_captured_trace(
            &self,
            incident_id: &str,
            subject_id: &str,
            events: &[Event],
        ) -> Result<()> {
            self.record();
            self.inner.ingest_captured_trace(incident_id, subject_id, events)
        }

        fn captured_trace(
            &self,
            incident_id: &str,
            subject_id: &str,
        ) -> Result<Option<CapturedTrace>> {
            self.record();
            self.inner.captured_trace(incident_id, subject_id)
        }

        fn captured_subjects(&self, incident_id: &str) -> Result<Vec<String>> {
            self.record();
            self.inner.captured_subjects(incident_id)
        }

        fn cleanup_incident(&self, incident_id: &str) -> Result<usize> {
            self.record();
            self.inner.cleanup_incident(incident_id)
        }

        fn health_check(&self) -> bool {
            self.inner.health_check()
        }
    }

    #[tokio::test]
    async fn store_calls_run_off_the_runtime_thread() {
        let h = Harness::new(FakeOracle::new(vec![Ok(analysis(0.9, false))]));
        let inner = MemoryGraphStore::new();
        for name in h.store.list_reference_graphs().unwrap() {
            inner
                .put_reference_graph(&h.store.load_reference_graph(&name).unwrap())
                .unwrap();
        }
        let store = Arc::new(ThreadRecordingStore {
            inner,
            threads: Mutex::new(Vec::new()),
        });
        let orchestrator = Orchestrator::new(
            Collaborators {
                store: store.clone(),
                infra: h.infra.clone(),
                metrics: h.metrics.clone(),
                logs: h.logs.clone(),
                traces: h.traces.clone(),
                oracle: h.oracle.clone(),
            },
            Arc::new(h.config.clone()),
        );
        let report = orchestrator
            .run(Incident::new(alert()), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.deviations[0].result.is_some());

        // The test runtime is single-threaded: every async task runs here.
        let runtime_thread = std::thread::current().id();
        let threads = store.threads.lock().unwrap();
        assert!(!threads.is_empty());
        assert!(threads.iter().all(|t| *t != runtime_thread));
    }

    #[test]
    fn nfs_merge_alert_and_graph_actors() {
        let g = ReferenceGraph::new(
            "g",
            "",
            vec![step(1, "UE", "a"), step(2, "AMF", "b"), step(3, "AUSF", "c")],
        );
        assert_eq!(incident_nfs(&alert(), Some(&g)), vec!["amf", "ue", "ausf"]);
        assert_eq!(incident_nfs(&alert(), None), vec!["amf"]);
    }
}
