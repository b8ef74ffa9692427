use super::collaborators::{Analysis, EvidenceLink};
use super::state::ExecutionState;
use crate::evidence::{CollectorFailureRecord, SubjectDeviation};
use crate::procedure::MappingMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REASON_ANALYSIS_TIMEOUT: &str = "analysis-timeout";
pub const REASON_ANALYSIS_FAILED: &str = "analysis-failed";
pub const REASON_CANCELLED: &str = "cancelled";

/// The one terminal record every incident produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalReport {
    pub incident_id: String,
    pub alertname: String,
    pub procedure: String,
    pub mapping_method: MappingMethod,
    /// "unknown" when no analysis completed.
    pub layer: String,
    pub root_cause: Option<String>,
    pub failure_mode: Option<String>,
    pub confidence: f64,
    pub evidence_chain: Vec<EvidenceLink>,
    pub infra_score: f64,
    pub evidence_quality_score: f64,
    pub attempt_count: u32,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    pub deviations: Vec<SubjectDeviation>,
    pub collector_failures: Vec<CollectorFailureRecord>,
    pub completed_at: DateTime<Utc>,
}

/// Inputs gathered over the run that are not part of [`ExecutionState`].
pub(crate) struct ReportParts {
    pub alertname: String,
    pub procedure: String,
    pub mapping_method: MappingMethod,
    pub analysis: Option<Analysis>,
    pub infra_score: f64,
    pub deviations: Vec<SubjectDeviation>,
    pub collector_failures: Vec<CollectorFailureRecord>,
}

impl FinalReport {
    pub(crate) fn assemble(exec: &ExecutionState, parts: ReportParts) -> Self {
        let (layer, root_cause, failure_mode, evidence_chain) = match parts.analysis {
            Some(a) => (a.layer, Some(a.root_cause), a.failure_mode, a.evidence_chain),
            None => ("unknown".to_string(), None, None, Vec::new()),
        };
        Self {
            incident_id: exec.incident_id.clone(),
            alertname: parts.alertname,
            procedure: parts.procedure,
            mapping_method: parts.mapping_method,
            layer,
            root_cause,
            failure_mode,
            confidence: exec.confidence,
            evidence_chain,
            infra_score: parts.infra_score,
            evidence_quality_score: exec.evidence_quality_score,
            attempt_count: exec.attempt_count,
            degraded: exec.degraded,
            degraded_reason: exec.degraded_reason.clone(),
            deviations: parts.deviations,
            collector_failures: parts.collector_failures,
            completed_at: Utc::now(),
        }
    }
}
