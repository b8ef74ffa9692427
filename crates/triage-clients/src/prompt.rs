//! Rendering the evidence bundle into an analysis prompt, and reading the
//! model's JSON answer back.

use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;
use triage_core::evidence::EvidenceBundle;
use triage_core::orchestrator::{Analysis, EvidenceLink};

pub const SYSTEM_PROMPT: &str = "You are a 5G core network troubleshooting expert. \
You localize the root cause of incidents from infrastructure findings, metrics, logs and \
deviations of observed procedures from their 3GPP reference. You answer with JSON only.";

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn section<T: Serialize>(out: &mut String, title: &str, value: Option<&T>) {
    let _ = writeln!(out, "## {title}");
    match value {
        Some(v) => {
            let _ = writeln!(out, "{}\n", pretty(v));
        }
        None => out.push_str("not collected\n\n"),
    }
}

/// Render the user prompt for one analysis attempt.
pub fn render(bundle: &EvidenceBundle) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Incident on procedure {} (window {}).\n",
        bundle.procedure, bundle.time_window
    );

    let _ = writeln!(
        out,
        "## Infrastructure findings (infrastructure score {:.2})",
        bundle.infra_score()
    );
    match &bundle.infra {
        Some(infra) => {
            let _ = writeln!(out, "{}\n", pretty(infra));
        }
        None => out.push_str("not collected\n\n"),
    }

    out.push_str("## Reference procedure\n");
    match &bundle.graph {
        Some(graph) => {
            let _ = writeln!(out, "{} ({})", graph.name, graph.spec);
            for step in graph.ordered_steps() {
                let _ = write!(out, "{}. {}: {}", step.order, step.actor, step.canonical_action);
                if step.optional {
                    out.push_str(" (optional)");
                }
                if let Some(sub) = &step.sub_graph {
                    let _ = write!(out, " [expands to {sub}]");
                }
                out.push('\n');
            }
            out.push('\n');
        }
        None => out.push_str("unavailable\n\n"),
    }

    section(&mut out, "Metrics", bundle.metrics.as_ref());
    section(
        &mut out,
        "Logs (annotated with the matching reference step)",
        bundle.logs.as_ref(),
    );

    out.push_str("## Trace deviations\n");
    if bundle.deviations.is_empty() {
        out.push_str("no subject traces were compared\n\n");
    } else {
        let _ = writeln!(out, "{}\n", pretty(&bundle.deviations));
    }

    let _ = writeln!(out, "## Evidence quality\n{:.2}\n", bundle.evidence_quality);

    out.push_str(ANALYSIS_GUIDE);
    out
}

const ANALYSIS_GUIDE: &str = r#"## How to decide
- Infrastructure score at or above 0.80: the infrastructure layer is almost certainly at fault.
- Score between 0.60 and 0.80: infrastructure is a probable contributor. Check whether application evidence explains the failure better.
- Score below 0.30: focus on the application layer.
- For application failures, the earliest deviation from the reference procedure outweighs later symptoms.
- Lower your confidence when evidence quality is low, and set needs_more_evidence when the evidence cannot separate the hypotheses.

Answer with a single JSON object:
{
  "layer": "infrastructure" | "application",
  "root_nf": "<network function>",
  "failure_mode": "<short description>",
  "failed_phase": "<reference step or phase>",
  "confidence": <number between 0 and 1>,
  "needs_more_evidence": <true | false>,
  "evidence_chain": [
    {"timestamp": "...", "source": "infra|metrics|logs|traces", "nf": "...", "type": "...", "content": "...", "significance": "..."}
  ],
  "alternative_hypotheses": ["..."],
  "reasoning": "..."
}
"#;

/// The JSON object embedded in `text`: from the first `{` to the last `}`.
/// Tolerates code fences and prose around the answer.
pub fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Parse the model's answer. Errors describe what was wrong with it.
pub fn parse_answer(text: &str) -> Result<Analysis, String> {
    let value: Value = serde_json::from_str(extract_json(text))
        .map_err(|e| format!("answer is not valid JSON: {e}"))?;

    let root_cause = value
        .get("root_nf")
        .or_else(|| value.get("root_cause"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("answer has no root_nf")?
        .to_string();

    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite())
    .ok_or("answer has no numeric confidence")?
    .clamp(0.0, 1.0);

    let text_field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };

    let evidence_chain: Vec<EvidenceLink> = value
        .get("evidence_chain")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    Ok(Analysis {
        layer: text_field("layer")
            .map(|l| l.to_lowercase())
            .unwrap_or_else(|| "application".to_string()),
        root_cause,
        failure_mode: text_field("failure_mode"),
        confidence,
        needs_more_evidence: value
            .get("needs_more_evidence")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        evidence_chain,
        reasoning: text_field("reasoning"),
    })
}
