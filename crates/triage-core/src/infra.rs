//! Rule-based infrastructure scoring over pod-level samples.
//!
//! Four weighted factors, each in [0, 1]:
//!
//! | factor    | default weight | scoring                                           |
//! |-----------|----------------|---------------------------------------------------|
//! | restarts  | 0.35           | 0 → 0.0, 1–2 → 0.4, 3–5 → 0.7, >5 → 1.0           |
//! | OOM kills | 0.25           | none → 0.0, any → 1.0                             |
//! | pod phase | 0.20           | Running 0.0, Pending 0.6, Failed/Unknown 1.0      |
//! | resources | 0.20           | memory > 90 % → 1.0, else cpu > 1 core → 0.8      |
//!
//! The weighted sum is clamped to 1.0.

use crate::config::InfraConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSample {
    pub pod: String,
    #[serde(default)]
    pub container: String,
    pub value: f64,
}

impl PodSample {
    pub fn new(pod: impl Into<String>, value: f64) -> Self {
        Self {
            pod: pod.into(),
            container: String::new(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Running,
    Pending,
    Succeeded,
    Failed,
    Unknown,
    CrashLoopBackOff,
}

impl PodPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "Running" => PodPhase::Running,
            "Pending" => PodPhase::Pending,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            "CrashLoopBackOff" => PodPhase::CrashLoopBackOff,
            _ => PodPhase::Unknown,
        }
    }

    fn is_failure(self) -> bool {
        matches!(
            self,
            PodPhase::Failed | PodPhase::Unknown | PodPhase::CrashLoopBackOff
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodPhaseSample {
    pub pod: String,
    pub phase: PodPhase,
}

/// Raw pod-level samples for the incident window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraMetrics {
    #[serde(default)]
    pub pod_restarts: Vec<PodSample>,
    #[serde(default)]
    pub oom_kills: Vec<PodSample>,
    #[serde(default)]
    pub pod_status: Vec<PodPhaseSample>,
    #[serde(default)]
    pub memory_percent: Vec<PodSample>,
    /// CPU usage in cores.
    #[serde(default)]
    pub cpu_usage: Vec<PodSample>,
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalEventKind {
    OomKill,
    ExcessiveRestarts,
    PodFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalEvent {
    pub kind: CriticalEventKind,
    pub pod: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PodPhase>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: f64,
    pub memory_percent: f64,
}

/// Everything the infrastructure collector forwards to analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraFindings {
    pub score: f64,
    pub pod_restarts: BTreeMap<String, f64>,
    pub oom_kills: BTreeMap<String, f64>,
    pub resource_usage: BTreeMap<String, ResourceUsage>,
    pub pod_phases: BTreeMap<String, PodPhase>,
    pub concurrent_failures: usize,
    pub critical_events: Vec<CriticalEvent>,
}

impl InfraFindings {
    pub fn from_metrics(metrics: &InfraMetrics, cfg: &InfraConfig) -> Self {
        let mut resource_usage: BTreeMap<String, ResourceUsage> = BTreeMap::new();
        for s in &metrics.cpu_usage {
            resource_usage.entry(s.pod.clone()).or_default().cpu = s.value;
        }
        for s in &metrics.memory_percent {
            resource_usage.entry(s.pod.clone()).or_default().memory_percent = s.value;
        }
        Self {
            score: infrastructure_score(metrics, cfg),
            pod_restarts: metrics
                .pod_restarts
                .iter()
                .map(|s| (s.pod.clone(), s.value))
                .collect(),
            oom_kills: metrics
                .oom_kills
                .iter()
                .filter(|s| s.value > 0.0)
                .map(|s| (s.pod.clone(), s.value))
                .collect(),
            resource_usage,
            pod_phases: metrics
                .pod_status
                .iter()
                .map(|s| (s.pod.clone(), s.phase))
                .collect(),
            concurrent_failures: concurrent_failures(metrics),
            critical_events: critical_events(metrics, cfg),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

fn max_value(samples: &[PodSample]) -> f64 {
    samples.iter().map(|s| s.value).fold(0.0, f64::max)
}

pub fn infrastructure_score(metrics: &InfraMetrics, cfg: &InfraConfig) -> f64 {
    let restarts = max_value(&metrics.pod_restarts);
    let restart_factor = if restarts > cfg.restart_threshold_critical {
        1.0
    } else if restarts >= cfg.restart_threshold_high {
        cfg.restart_factor_high
    } else if restarts >= 1.0 {
        cfg.restart_factor_low
    } else {
        0.0
    };

    let oom_factor = if metrics.oom_kills.is_empty() { 0.0 } else { 1.0 };

    let status_factor = metrics
        .pod_status
        .iter()
        .map(|s| match s.phase {
            PodPhase::Failed | PodPhase::Unknown | PodPhase::CrashLoopBackOff => 1.0,
            PodPhase::Pending => cfg.pod_pending_factor,
            PodPhase::Running | PodPhase::Succeeded => 0.0,
        })
        .fold(0.0, f64::max);

    let resource_factor = if max_value(&metrics.memory_percent) > cfg.memory_saturation_pct {
        1.0
    } else if max_value(&metrics.cpu_usage) > cfg.cpu_saturation_cores {
        cfg.cpu_saturation_factor
    } else {
        0.0
    };

    let score = cfg.weight_restarts * restart_factor
        + cfg.weight_oom * oom_factor
        + cfg.weight_pod_status * status_factor
        + cfg.weight_resources * resource_factor;
    score.min(1.0)
}

/// OOM kills, restart counts above the critical threshold, and failed pods.
pub fn critical_events(metrics: &InfraMetrics, cfg: &InfraConfig) -> Vec<CriticalEvent> {
    let mut events = Vec::new();
    for s in metrics.oom_kills.iter().filter(|s| s.value > 0.0) {
        events.push(CriticalEvent {
            kind: CriticalEventKind::OomKill,
            pod: s.pod.clone(),
            container: s.container.clone(),
            value: Some(s.value),
            phase: None,
        });
    }
    for s in metrics
        .pod_restarts
        .iter()
        .filter(|s| s.value > cfg.restart_threshold_critical)
    {
        events.push(CriticalEvent {
            kind: CriticalEventKind::ExcessiveRestarts,
            pod: s.pod.clone(),
            container: s.container.clone(),
            value: Some(s.value),
            phase: None,
        });
    }
    for s in metrics.pod_status.iter().filter(|s| s.phase.is_failure()) {
        events.push(CriticalEvent {
            kind: CriticalEventKind::PodFailure,
            pod: s.pod.clone(),
            container: String::new(),
            value: None,
            phase: Some(s.phase),
        });
    }
    events
}

/// Distinct pods with any restart, OOM kill, or non-running phase.
pub fn concurrent_failures(metrics: &InfraMetrics) -> usize {
    let mut failing: BTreeSet<&str> = BTreeSet::new();
    failing.extend(
        metrics
            .pod_restarts
            .iter()
            .chain(&metrics.oom_kills)
            .filter(|s| s.value > 0.0)
            .map(|s| s.pod.as_str()),
    );
    failing.extend(
        metrics
            .pod_status
            .iter()
            .filter(|s| s.phase != PodPhase::Running)
            .map(|s| s.pod.as_str()),
    );
    failing.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
