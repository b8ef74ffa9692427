//! Log annotation, subject discovery and trace construction.
//!
//! Annotation uses each step's `match_keywords`: case-insensitive wildcard
//! patterns where `*` stands for any run of characters. This is a heuristic
//! surface for analysis and trace construction only. The deviation rule never
//! looks at keywords.

use crate::error::{Result, TriageError};
use crate::evidence::{AnnotatedLog, LogEntry};
use crate::graph::{CapturedTrace, Event, ReferenceGraph};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashSet};

// ---------------------------------------------------------------------------
// Wildcards
// ---------------------------------------------------------------------------

/// Compile a wildcard pattern into an unanchored, case-insensitive regex.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    RegexBuilder::new(&body)
        .case_insensitive(true)
        .build()
        .map_err(|e| TriageError::Config(format!("invalid keyword pattern '{pattern}': {e}")))
}

pub fn wildcard_match(text: &str, pattern: &str) -> bool {
    wildcard_regex(pattern).is_ok_and(|re| re.is_match(text))
}

/// NF name from a pod name: the lowercase prefix before the first `-`.
pub fn nf_from_pod(pod: &str) -> String {
    pod.split('-').next().unwrap_or_default().to_lowercase()
}

// ---------------------------------------------------------------------------
// PhaseMatcher
// ---------------------------------------------------------------------------

struct Keyword {
    order: u32,
    pattern: String,
    regex: Regex,
}

/// Precompiled keyword patterns of one reference graph, in step order.
pub struct PhaseMatcher {
    keywords: Vec<Keyword>,
}

impl PhaseMatcher {
    pub fn new(graph: &ReferenceGraph) -> Result<Self> {
        let mut keywords = Vec::new();
        for step in graph.ordered_steps() {
            for pattern in &step.match_keywords {
                keywords.push(Keyword {
                    order: step.order,
                    pattern: pattern.clone(),
                    regex: wildcard_regex(pattern)?,
                });
            }
        }
        Ok(Self { keywords })
    }

    /// The lowest-order step with a keyword matching `message`, and that keyword.
    pub fn match_message(&self, message: &str) -> Option<(u32, &str)> {
        self.keywords
            .iter()
            .find(|k| k.regex.is_match(message))
            .map(|k| (k.order, k.pattern.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Group log lines by NF and tag each with its probable step.
pub fn annotate_logs(
    entries: &[LogEntry],
    matcher: Option<&PhaseMatcher>,
) -> BTreeMap<String, Vec<AnnotatedLog>> {
    let mut by_nf: BTreeMap<String, Vec<AnnotatedLog>> = BTreeMap::new();
    for entry in entries {
        let matched = matcher.and_then(|m| m.match_message(&entry.message));
        by_nf
            .entry(nf_from_pod(&entry.pod))
            .or_default()
            .push(AnnotatedLog {
                timestamp: entry.timestamp,
                level: entry.level.clone(),
                message: entry.message.clone(),
                matched_step: matched.map(|(order, _)| order),
                matched_pattern: matched.map(|(_, p)| p.to_string()),
            });
    }
    by_nf
}

/// Level keyword found in `message`, most severe first. Defaults to `INFO`.
pub fn log_level(message: &str) -> &'static str {
    let upper = message.to_uppercase();
    ["FATAL", "ERROR", "WARN", "INFO", "DEBUG"]
        .into_iter()
        .find(|l| upper.contains(l))
        .unwrap_or("INFO")
}

// ---------------------------------------------------------------------------
// Subjects and traces
// ---------------------------------------------------------------------------

/// Unique subject ids captured by `pattern`'s first group, first-seen order.
pub fn extract_subjects(entries: &[LogEntry], pattern: &Regex) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in entries {
        for caps in pattern.captures_iter(&entry.message) {
            if let Some(m) = caps.get(1) {
                if seen.insert(m.as_str().to_string()) {
                    out.push(m.as_str().to_string());
                }
            }
        }
    }
    out
}

/// Build the captured trace of one subject from its log lines.
///
/// Each line whose message matches a step keyword becomes an event at that
/// step's order, with the message as the action and the pod's NF as the
/// actor. Lines are taken in timestamp order; when several map to the same
/// order the most recent one is kept. Lines that match no step are dropped.
pub fn build_trace(
    incident_id: &str,
    subject_id: &str,
    entries: &[LogEntry],
    matcher: &PhaseMatcher,
) -> CapturedTrace {
    let mut sorted: Vec<&LogEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut by_order: BTreeMap<u32, Event> = BTreeMap::new();
    for entry in sorted {
        if let Some((order, _)) = matcher.match_message(&entry.message) {
            by_order.insert(
                order,
                Event {
                    order: i64::from(order),
                    actor: nf_from_pod(&entry.pod).to_uppercase(),
                    action: entry.message.clone(),
                    timestamp: entry.timestamp,
                },
            );
        }
    }
    CapturedTrace::new(incident_id, subject_id, by_order.into_values().collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::step;

    fn log(ts: i64, pod: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: ts,
            message: message.into(),
            pod: pod.into(),
            level: log_level(message).into(),
        }
    }

    fn graph() -> ReferenceGraph {
        let mut s1 = step(1, "UE", "Registration Request");
        s1.match_keywords = vec!["*registration request*".into()];
        let mut s2 = step(2, "AMF", "AUSF selection");
        s2.match_keywords = vec!["*select*ausf*".into()];
        let mut s3 = step(3, "AUSF", "Authentication/Security");
        s3.match_keywords = vec!["*authentication*".into(), "*security mode*".into()];
        ReferenceGraph::new("g", "", vec![s1, s2, s3])
    }

    #[test]
    fn wildcard_is_case_insensitive_and_literal() {
        assert!(wildcard_match("AUSF: Authentication FAILED", "*authentication*fail*"));
        assert!(wildcard_match("res verification ok", "*res*verif*"));
        assert!(!wildcard_match("authxentication", "*auth.entication*"));
        assert!(wildcard_match("a (b) c", "*(b)*"));
    }

    #[test]
    fn nf_prefix_from_pod_name() {
        assert_eq!(nf_from_pod("AMF-7d9c-xk2"), "amf");
        assert_eq!(nf_from_pod("mongodb"), "mongodb");
        assert_eq!(nf_from_pod(""), "");
    }

    #[test]
    fn annotate_groups_by_nf_and_tags_first_step() {
        let matcher = PhaseMatcher::new(&graph()).unwrap();
        let logs = vec![
            log(10, "amf-0", "INFO selecting AUSF instance"),
            log(11, "ausf-1", "ERROR authentication failed for imsi-001010000000001"),
            log(12, "ausf-1", "WARN retrying"),
        ];
        let by_nf = annotate_logs(&logs, Some(&matcher));
        assert_eq!(by_nf.len(), 2);
        assert_eq!(by_nf["amf"][0].matched_step, Some(2));
        let ausf = &by_nf["ausf"];
        assert_eq!(ausf[0].matched_step, Some(3));
        assert_eq!(ausf[0].matched_pattern.as_deref(), Some("*authentication*"));
        assert_eq!(ausf[0].level, "ERROR");
        assert_eq!(ausf[1].matched_step, None);
    }

    #[test]
    fn subjects_are_unique_in_first_seen_order() {
        let re = Regex::new(r"imsi-(\d{14,15})").unwrap();
        let logs = vec![
            log(1, "amf-0", "reg imsi-001010000000002"),
            log(2, "amf-0", "reg imsi-001010000000001 and imsi-001010000000002"),
            log(3, "amf-0", "no subject here"),
        ];
        assert_eq!(
            extract_subjects(&logs, &re),
            vec!["001010000000002", "001010000000001"]
        );
    }

    #[test]
    fn trace_keeps_latest_line_per_step() {
        let matcher = PhaseMatcher::new(&graph()).unwrap();
        let logs = vec![
            log(30, "ausf-1", "Authentication FAILED"),
            log(10, "ue-0", "Registration Request sent"),
            log(20, "ausf-1", "Authentication started"),
            log(25, "amf-0", "heartbeat"),
        ];
        let trace = build_trace("inc", "imsi", &logs, &matcher);
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events[0].order, 1);
        assert_eq!(trace.events[1].order, 3);
        assert_eq!(trace.events[1].action, "Authentication FAILED");
        assert_eq!(trace.events[1].actor, "AUSF");
    }

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(log_level("fatal: boom"), "FATAL");
        assert_eq!(log_level("Warning: disk"), "WARN");
        assert_eq!(log_level("all good"), "INFO");
    }
}
