//! Evidence gathered for one incident attempt.
//!
//! The bundle has one optional field per category so that "which categories
//! are present" is a closed question the quality table can answer
//! exhaustively.

use crate::config::EvidenceQualityTable;
use crate::deviation::DeviationResult;
use crate::graph::{CapturedTrace, ReferenceGraph};
use crate::infra::InfraFindings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// EvidenceKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Infra,
    Metrics,
    Logs,
    Traces,
}

impl EvidenceKind {
    pub const ALL: [EvidenceKind; 4] = [
        EvidenceKind::Infra,
        EvidenceKind::Metrics,
        EvidenceKind::Logs,
        EvidenceKind::Traces,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceKind::Infra => "infra",
            EvidenceKind::Metrics => "metrics",
            EvidenceKind::Logs => "logs",
            EvidenceKind::Traces => "traces",
        }
    }
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CollectorError
// ---------------------------------------------------------------------------

/// Typed failure of one collector invocation. Never fatal to the incident.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectorError {
    #[error("timed out")]
    Timeout,
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The backend answered but the payload was incomplete or unusable.
    #[error("partial data: {0}")]
    PartialData(String),
}

impl CollectorError {
    pub fn kind(&self) -> &'static str {
        match self {
            CollectorError::Timeout => "timeout",
            CollectorError::Unavailable(_) => "unavailable",
            CollectorError::PartialData(_) => "partial_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorFailureRecord {
    pub collector: EvidenceKind,
    pub attempt: u32,
    pub kind: String,
    pub message: String,
}

impl CollectorFailureRecord {
    pub fn new(collector: EvidenceKind, attempt: u32, err: &CollectorError) -> Self {
        Self {
            collector,
            attempt,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-category evidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub query: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// `(unix seconds, value)` pairs.
    #[serde(default)]
    pub values: Vec<(i64, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvidence {
    pub by_nf: BTreeMap<String, Vec<MetricSeries>>,
}

impl MetricsEvidence {
    pub fn is_empty(&self) -> bool {
        self.by_nf.values().all(Vec::is_empty)
    }
}

/// One raw log line as returned by the log backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix seconds.
    pub timestamp: i64,
    pub message: String,
    #[serde(default)]
    pub pod: String,
    #[serde(default)]
    pub level: String,
}

/// A log line tagged with the reference step it most likely belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedLog {
    pub timestamp: i64,
    pub level: String,
    pub message: String,
    pub matched_step: Option<u32>,
    pub matched_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsEvidence {
    /// Annotated lines keyed by lowercase NF name.
    pub by_nf: BTreeMap<String, Vec<AnnotatedLog>>,
    /// Trace subjects (IMSIs) seen in the lines, first-seen order.
    #[serde(default)]
    pub subjects: Vec<String>,
}

impl LogsEvidence {
    pub fn is_empty(&self) -> bool {
        self.by_nf.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvidence {
    pub traces: Vec<CapturedTrace>,
}

impl TraceEvidence {
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.traces.iter().map(|t| t.subject_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDeviation {
    pub subject_id: String,
    /// `None` when the comparison could not be made; see `error`.
    pub result: Option<DeviationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Mandatory steps with no captured event. Informational only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unobserved_mandatory_steps: Vec<u32>,
}

// ---------------------------------------------------------------------------
// EvidenceBundle
// ---------------------------------------------------------------------------

/// Which of the scored categories are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvidenceCategories {
    pub metrics: bool,
    pub logs: bool,
    pub traces: bool,
}

impl EvidenceCategories {
    /// Fixed lookup from present categories to a quality score in [0, 1].
    pub fn quality(self, table: &EvidenceQualityTable) -> f64 {
        let score = match (self.metrics, self.logs, self.traces) {
            (true, true, true) => table.all_sources,
            (true, false, true) | (false, true, true) => table.traces_plus_one,
            (true, true, false) => table.metrics_logs,
            (false, false, true) => table.traces_only,
            (true, false, false) => table.metrics_only,
            (false, true, false) => table.logs_only,
            (false, false, false) => table.no_evidence,
        };
        score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvidenceBundle {
    pub procedure: String,
    pub graph: Option<ReferenceGraph>,
    pub infra: Option<InfraFindings>,
    pub metrics: Option<MetricsEvidence>,
    pub logs: Option<LogsEvidence>,
    pub traces: Option<TraceEvidence>,
    pub deviations: Vec<SubjectDeviation>,
    pub evidence_quality: f64,
    /// Human-readable description of the collection window.
    pub time_window: String,
}

impl EvidenceBundle {
    /// Metrics and logs count when non-empty; traces count whenever the
    /// trace collector succeeded, even with no subjects.
    pub fn categories(&self) -> EvidenceCategories {
        EvidenceCategories {
            metrics: self.metrics.as_ref().is_some_and(|m| !m.is_empty()),
            logs: self.logs.as_ref().is_some_and(|l| !l.is_empty()),
            traces: self.traces.is_some(),
        }
    }

    pub fn infra_score(&self) -> f64 {
        self.infra.as_ref().map(|i| i.score).unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
