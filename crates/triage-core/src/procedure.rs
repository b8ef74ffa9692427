//! Alertmanager alert model and alert → reference procedure mapping.

use crate::config::ProceduresConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

/// One alert of an Alertmanager webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
    #[serde(default)]
    pub fingerprint: String,
}

impl Alert {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn alertname(&self) -> &str {
        self.label("alertname").unwrap_or("unknown")
    }

    /// Key identifying the same alert across firing/resolved notifications.
    /// Falls back to the alert name when Alertmanager sent no fingerprint.
    pub fn identity(&self) -> String {
        if self.fingerprint.is_empty() {
            format!("alertname:{}", self.alertname())
        } else {
            self.fingerprint.clone()
        }
    }

    /// Lowercase NF names from the `nf` label (comma separated), or the
    /// prefix of the `pod` label when there is no `nf` label.
    pub fn affected_nfs(&self) -> Vec<String> {
        if let Some(nf) = self.label("nf") {
            return nf
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
        }
        self.label("pod")
            .map(|pod| vec![crate::annotate::nf_from_pod(pod)])
            .unwrap_or_default()
    }
}

/// Alertmanager webhook body (version 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    #[serde(default)]
    pub receiver: String,
    pub status: AlertStatus,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default, rename = "externalURL")]
    pub external_url: String,
    #[serde(default)]
    pub group_key: String,
}

// ---------------------------------------------------------------------------
// Procedure mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    ExactMatch,
    KeywordMatch,
    NfDefault,
    GenericFallback,
}

impl MappingMethod {
    /// Heuristic confidence that the chosen graph is the failing procedure.
    pub fn confidence(self) -> f64 {
        match self {
            MappingMethod::ExactMatch => 1.0,
            MappingMethod::KeywordMatch => 0.8,
            MappingMethod::NfDefault => 0.6,
            MappingMethod::GenericFallback => 0.3,
        }
    }
}

impl fmt::Display for MappingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MappingMethod::ExactMatch => "exact_match",
            MappingMethod::KeywordMatch => "keyword_match",
            MappingMethod::NfDefault => "nf_default",
            MappingMethod::GenericFallback => "generic_fallback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureMapping {
    pub graph: String,
    pub method: MappingMethod,
}

/// Choose the reference graph for `alert`.
///
/// Tried in order: the `procedure` label naming an available graph
/// (case-insensitive), keyword rules over the alert name, the default graph of
/// the first affected NF, then the configured fallback. Rules and NF defaults
/// naming a graph that is not in `available` are skipped.
pub fn map_procedure(alert: &Alert, cfg: &ProceduresConfig, available: &[String]) -> ProcedureMapping {
    let find = |name: &str| {
        available
            .iter()
            .find(|g| g.eq_ignore_ascii_case(name))
            .cloned()
    };

    if let Some(graph) = alert.label("procedure").and_then(find) {
        return ProcedureMapping {
            graph,
            method: MappingMethod::ExactMatch,
        };
    }

    let alertname = alert.alertname().to_lowercase();
    for rule in &cfg.rules {
        let hit = rule
            .keywords
            .iter()
            .any(|k| alertname.contains(&k.to_lowercase()));
        if let Some(graph) = hit.then(|| find(&rule.graph)).flatten() {
            return ProcedureMapping {
                graph,
                method: MappingMethod::KeywordMatch,
            };
        }
    }

    for nf in alert.affected_nfs() {
        if let Some(graph) = cfg.nf_defaults.get(&nf).and_then(|g| find(g)) {
            return ProcedureMapping {
                graph,
                method: MappingMethod::NfDefault,
            };
        }
    }

    ProcedureMapping {
        graph: cfg.fallback.clone(),
        method: MappingMethod::GenericFallback,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
