//! Incident lifecycle state and the confidence gate.
//!
//! Transitions:
//!
//! ```text
//! Pending → Collecting → Analyzing → (RetryPending → Collecting)* → Finalizing → Done
//! ```
//!
//! Any non-terminal state may also jump to `Finalizing` when the incident is
//! cancelled.

use crate::config::GateConfig;
use crate::error::{Result, TriageError};
use crate::evidence::EvidenceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// IncidentState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentState {
    Pending,
    Collecting,
    Analyzing,
    RetryPending,
    Finalizing,
    Done,
}

impl IncidentState {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentState::Pending => "PENDING",
            IncidentState::Collecting => "COLLECTING",
            IncidentState::Analyzing => "ANALYZING",
            IncidentState::RetryPending => "RETRY_PENDING",
            IncidentState::Finalizing => "FINALIZING",
            IncidentState::Done => "DONE",
        }
    }

    pub fn can_transition_to(self, next: IncidentState) -> bool {
        use IncidentState::*;
        matches!(
            (self, next),
            (Pending, Collecting)
                | (Collecting, Analyzing)
                | (Analyzing, RetryPending)
                | (Analyzing, Finalizing)
                | (RetryPending, Collecting)
                | (Pending | Collecting | RetryPending, Finalizing)
                | (Finalizing, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == IncidentState::Done
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Infra,
    Metrics,
    Logs,
    Traces,
    Deviation,
    Analysis,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Infra,
        Phase::Metrics,
        Phase::Logs,
        Phase::Traces,
        Phase::Deviation,
        Phase::Analysis,
    ];
}

impl From<EvidenceKind> for Phase {
    fn from(kind: EvidenceKind) -> Self {
        match kind {
            EvidenceKind::Infra => Phase::Infra,
            EvidenceKind::Metrics => Phase::Metrics,
            EvidenceKind::Logs => Phase::Logs,
            EvidenceKind::Traces => Phase::Traces,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Done,
    Failed,
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// Mutable state of one incident run. Owned by a single orchestrator run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub incident_id: String,
    pub state: IncidentState,
    pub phase_statuses: BTreeMap<Phase, PhaseStatus>,
    /// 1-based; the attempt currently running.
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub evidence_quality_score: f64,
    pub confidence: f64,
    pub needs_more_evidence: bool,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

impl ExecutionState {
    pub fn new(incident_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            incident_id: incident_id.into(),
            state: IncidentState::Pending,
            phase_statuses: Phase::ALL
                .into_iter()
                .map(|p| (p, PhaseStatus::Pending))
                .collect(),
            attempt_count: 1,
            max_attempts: max_attempts.max(1),
            evidence_quality_score: 0.0,
            confidence: 0.0,
            needs_more_evidence: false,
            degraded: false,
            degraded_reason: None,
        }
    }

    pub fn transition(&mut self, next: IncidentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TriageError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn set_phase(&mut self, phase: Phase, status: PhaseStatus) {
        self.phase_statuses.insert(phase, status);
    }

    /// Reset every phase to `Pending` ahead of a new collection attempt.
    pub fn reset_phases(&mut self) {
        for status in self.phase_statuses.values_mut() {
            *status = PhaseStatus::Pending;
        }
    }

    /// Mark degraded. The first reason recorded is kept.
    pub fn degrade(&mut self, reason: &str) {
        self.degraded = true;
        if self.degraded_reason.is_none() {
            self.degraded_reason = Some(reason.to_string());
        }
    }

    /// Move to `RetryPending` and count the next attempt.
    pub fn begin_retry(&mut self) -> Result<()> {
        self.transition(IncidentState::RetryPending)?;
        if self.attempt_count >= self.max_attempts {
            return Err(TriageError::Internal(format!(
                "retry requested at attempt {} of {}",
                self.attempt_count, self.max_attempts
            )));
        }
        self.attempt_count += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Confidence gate
// ---------------------------------------------------------------------------

/// 0.65 when evidence quality is at least 0.80, otherwise 0.70 (defaults).
pub fn effective_threshold(evidence_quality: f64, gate: &GateConfig) -> f64 {
    if evidence_quality >= gate.high_quality_cutoff {
        gate.threshold_high_quality
    } else {
        gate.threshold_default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Retry,
    Finalize,
}

/// Retry while confidence is below the effective threshold and attempts
/// remain. Never retries past `max_attempts`.
pub fn confidence_gate(
    evidence_quality: f64,
    confidence: f64,
    attempt_count: u32,
    max_attempts: u32,
    gate: &GateConfig,
) -> GateDecision {
    let below = confidence < effective_threshold(evidence_quality, gate);
    if below && attempt_count < max_attempts {
        GateDecision::Retry
    } else {
        GateDecision::Finalize
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
