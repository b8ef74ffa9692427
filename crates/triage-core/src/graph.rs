//! Reference procedure graphs and captured traces.
//!
//! A [`ReferenceGraph`] is a named, ordered list of expected [`Step`]s for a
//! multi-party procedure (e.g. 5G registration). A [`CapturedTrace`] is the
//! ordered list of observed [`Event`]s for one subject during one incident.
//! Event orders are assigned by whoever builds the trace and are expected to
//! line up with the step orders of the same procedure.

use crate::error::{Result, TriageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Largest step count a graph may have. Sub-graph windows give each nested
/// graph `SUB_GRAPH_STRIDE - 1` captured orders.
pub const MAX_STEPS: usize = (crate::deviation::SUB_GRAPH_STRIDE - 1) as usize;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub order: u32,
    pub actor: String,
    pub canonical_action: String,
    /// Case-insensitive wildcard patterns used to annotate log lines with a
    /// probable step. Never consulted by deviation detection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_keywords: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_graph: Option<String>,
}

// ---------------------------------------------------------------------------
// ReferenceGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGraph {
    pub name: String,
    /// Free-text provenance tag, e.g. "3GPP TS 23.502 4.2.2.2".
    #[serde(default)]
    pub spec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    pub steps: Vec<Step>,
}

/// A `NEXT` edge between consecutive steps. Traversal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextRelation {
    pub from: u32,
    pub to: u32,
}

impl ReferenceGraph {
    pub fn new(name: impl Into<String>, spec: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            spec: spec.into(),
            procedure: None,
            steps,
        }
    }

    /// Check that step orders are unique, contiguous and start at 1, that
    /// every step names an action, and that there are at most [`MAX_STEPS`].
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| TriageError::InvalidGraph {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("graph name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(invalid("graph has no steps".into()));
        }
        if self.steps.len() > MAX_STEPS {
            return Err(invalid(format!(
                "graph has {} steps, at most {MAX_STEPS} allowed",
                self.steps.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if step.order == 0 {
                return Err(invalid("step orders start at 1".into()));
            }
            if !seen.insert(step.order) {
                return Err(invalid(format!("duplicate step order {}", step.order)));
            }
            if step.canonical_action.is_empty() {
                return Err(invalid(format!(
                    "step {} has an empty canonical action",
                    step.order
                )));
            }
            if step.sub_graph.as_deref() == Some(self.name.as_str()) {
                return Err(invalid(format!("step {} nests its own graph", step.order)));
            }
        }
        // Unique positive orders whose maximum equals the count are exactly 1..=n.
        let max = seen.last().copied().unwrap_or(0);
        if max as usize != self.steps.len() {
            let missing: Vec<String> = (1..=max)
                .filter(|o| !seen.contains(o))
                .map(|o| o.to_string())
                .collect();
            return Err(invalid(format!(
                "step orders are not contiguous (missing {})",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Steps sorted by ascending order.
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    pub fn step(&self, order: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.order == order)
    }

    pub fn next_relations(&self) -> Vec<NextRelation> {
        let steps = self.ordered_steps();
        steps
            .windows(2)
            .map(|w| NextRelation {
                from: w[0].order,
                to: w[1].order,
            })
            .collect()
    }

    /// Distinct actors in first-appearance order.
    pub fn actors(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for step in self.ordered_steps() {
            if !out.contains(&step.actor) {
                out.push(step.actor.clone());
            }
        }
        out
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let graph: ReferenceGraph = serde_yaml::from_str(data)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    /// Load every `*.yaml` / `*.yml` graph in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>> {
        crate::io::list_files_with_ext(dir, &["yaml", "yml"])?
            .iter()
            .map(|p| Self::load(p))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CapturedTrace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub order: i64,
    #[serde(default)]
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedTrace {
    pub incident_id: String,
    pub subject_id: String,
    pub events: Vec<Event>,
}

impl CapturedTrace {
    pub fn new(
        incident_id: impl Into<String>,
        subject_id: impl Into<String>,
        events: Vec<Event>,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            subject_id: subject_id.into(),
            events,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn step(order: u32, actor: &str, action: &str) -> Step {
        Step {
            order,
            actor: actor.to_string(),
            canonical_action: action.to_string(),
            match_keywords: vec![],
            optional: false,
            sub_graph: None,
        }
    }

    #[test]
    fn validate_accepts_contiguous_orders() {
        let g = ReferenceGraph::new(
            "g",
            "test",
            vec![step(2, "AMF", "b"), step(1, "UE", "a"), step(3, "AUSF", "c")],
        );
        g.validate().unwrap();
    }

    #[test]
    fn validate_rejects_gap() {
        let g = ReferenceGraph::new("g", "", vec![step(1, "UE", "a"), step(3, "AMF", "c")]);
        let err = g.validate().unwrap_err().to_string();
        assert!(err.contains("missing 2"), "{err}");
    }

    #[test]
    fn validate_rejects_duplicate_and_zero() {
        let dup = ReferenceGraph::new("g", "", vec![step(1, "UE", "a"), step(1, "AMF", "b")]);
        assert!(dup.validate().is_err());
        let zero = ReferenceGraph::new("g", "", vec![step(0, "UE", "a")]);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn validate_bounds_step_count() {
        let steps = |n: u32| (1..=n).map(|o| step(o, "AMF", "x")).collect();
        ReferenceGraph::new("g", "", steps(999)).validate().unwrap();
        let err = ReferenceGraph::new("g", "", steps(1000))
            .validate()
            .unwrap_err()
            .to_string();
        assert!(err.contains("at most 999"), "{err}");
    }

    #[test]
    fn validate_rejects_self_nesting() {
        let mut s = step(1, "UE", "a");
        s.sub_graph = Some("g".into());
        let g = ReferenceGraph::new("g", "", vec![s]);
        assert!(g.validate().is_err());
    }

    #[test]
    fn next_relations_link_consecutive_orders() {
        let g = ReferenceGraph::new(
            "g",
            "",
            vec![step(3, "c", "c"), step(1, "a", "a"), step(2, "b", "b")],
        );
        let rel = g.next_relations();
        assert_eq!(
            rel,
            vec![
                NextRelation { from: 1, to: 2 },
                NextRelation { from: 2, to: 3 }
            ]
        );
    }

    #[test]
    fn actors_are_distinct_in_order() {
        let g = ReferenceGraph::new(
            "g",
            "",
            vec![step(1, "UE", "a"), step(2, "AMF", "b"), step(3, "UE", "c")],
        );
        assert_eq!(g.actors(), vec!["UE", "AMF"]);
    }

    #[test]
    fn yaml_defaults_optional_fields() {
        let yaml = "name: Auth\nspec: TS 33.501\nsteps:\n  - order: 1\n    actor: AMF\n    canonical_action: Authentication Request\n";
        let g = ReferenceGraph::from_yaml(yaml).unwrap();
        assert!(!g.steps[0].optional);
        assert!(g.steps[0].match_keywords.is_empty());
        assert!(g.steps[0].sub_graph.is_none());
    }

    #[test]
    fn shipped_graphs_are_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../dags");
        let graphs = ReferenceGraph::load_dir(&dir).unwrap();
        assert!(graphs.len() >= 3);
        let reg = graphs
            .iter()
            .find(|g| g.name == "Registration_General")
            .unwrap();
        assert_eq!(reg.steps.len(), 24);
        assert_eq!(
            reg.step(9).unwrap().sub_graph.as_deref(),
            Some("Authentication_5G_AKA")
        );
    }
}
