//! Interfaces of the orchestrator's external collaborators.

use crate::error::Result;
use crate::evidence::{
    CollectorError, EvidenceBundle, EvidenceKind, LogsEvidence, MetricsEvidence, TraceEvidence,
};
use crate::graph::ReferenceGraph;
use crate::infra::InfraFindings;
use crate::procedure::Alert;
use crate::store::GraphStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// IncidentContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// `[anchor - before, anchor + after]`, in seconds.
    pub fn around(anchor: DateTime<Utc>, before_secs: i64, after_secs: i64) -> Self {
        Self {
            start: anchor - ChronoDuration::seconds(before_secs),
            end: anchor + ChronoDuration::seconds(after_secs),
        }
    }

    pub fn start_secs(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_secs(&self) -> i64 {
        self.end.timestamp()
    }
}

/// What a collector needs to know about the incident for one attempt.
#[derive(Debug, Clone)]
pub struct IncidentContext {
    pub incident_id: String,
    pub alert: Alert,
    /// Name of the reference graph selected for the alert.
    pub procedure: String,
    /// `None` when the graph could not be loaded.
    pub graph: Option<ReferenceGraph>,
    /// Lowercase NF names to query.
    pub nfs: Vec<String>,
    pub window: TimeWindow,
    pub attempt: u32,
    /// Subjects already discovered in logs this attempt. Empty means the
    /// trace collector has to discover subjects itself.
    pub subjects: Vec<String>,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// One evidence category. Implementations should respect `budget`; the
/// orchestrator enforces it independently with its own timeout.
#[async_trait]
pub trait Collector: Send + Sync {
    type Output: Send + 'static;

    fn kind(&self) -> EvidenceKind;

    async fn fetch(
        &self,
        ctx: &IncidentContext,
        budget: Duration,
    ) -> std::result::Result<Self::Output, CollectorError>;
}

// ---------------------------------------------------------------------------
// AnalysisOracle
// ---------------------------------------------------------------------------

/// One entry of the evidence chain supporting an analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLink {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub nf: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub significance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// "infrastructure" or "application".
    pub layer: String,
    pub root_cause: String,
    #[serde(default)]
    pub failure_mode: Option<String>,
    /// In [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub needs_more_evidence: bool,
    #[serde(default)]
    pub evidence_chain: Vec<EvidenceLink>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Opaque scoring step over the evidence bundle.
///
/// Errors: `OracleTimeout` when the budget ran out, `OracleFailed` for any
/// other failure (transport, malformed answer).
#[async_trait]
pub trait AnalysisOracle: Send + Sync {
    async fn analyze(&self, bundle: &EvidenceBundle, budget: Duration) -> Result<Analysis>;
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Everything an orchestrator run talks to, injected per run.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn GraphStore>,
    pub infra: Arc<dyn Collector<Output = InfraFindings>>,
    pub metrics: Arc<dyn Collector<Output = MetricsEvidence>>,
    pub logs: Arc<dyn Collector<Output = LogsEvidence>>,
    pub traces: Arc<dyn Collector<Output = TraceEvidence>>,
    pub oracle: Arc<dyn AnalysisOracle>,
}
