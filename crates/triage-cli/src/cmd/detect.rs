use super::{graph_dir, load_config, memory_store};
use crate::output::print_json;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use triage_core::deviation::{unobserved_mandatory_steps, DeviationEngine, DeviationResult};
use triage_core::graph::{CapturedTrace, Event};
use triage_core::store::GraphStore;

#[derive(Deserialize)]
#[serde(untagged)]
enum TraceFile {
    Trace(CapturedTrace),
    Events(Vec<Event>),
}

/// YAML is a superset of JSON, so one parser covers both.
fn read_trace(path: &Path) -> anyhow::Result<CapturedTrace> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read trace {}", path.display()))?;
    let parsed: TraceFile = serde_yaml::from_str(&data)
        .with_context(|| format!("failed to parse trace {}", path.display()))?;
    Ok(match parsed {
        TraceFile::Trace(t) => t,
        TraceFile::Events(events) => CapturedTrace::new("cli", "cli", events),
    })
}

pub fn run(
    config_path: &Path,
    graph_name: &str,
    trace_path: &Path,
    dir: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = memory_store(&graph_dir(&config, dir))?;
    let trace = read_trace(trace_path)?;

    let result = DeviationEngine::new(&store)
        .detect(graph_name, &trace)
        .with_context(|| format!("deviation check against '{graph_name}' failed"))?;
    let graph = store.load_reference_graph(graph_name)?;
    let unobserved = unobserved_mandatory_steps(&graph, &trace);

    if json {
        return print_json(&serde_json::json!({
            "graph": graph_name,
            "subjectId": trace.subject_id,
            "result": result,
            "unobservedMandatorySteps": unobserved,
        }));
    }

    match &result {
        DeviationResult::Conforms => {
            println!("CONFORMS: {} events match {graph_name}", trace.events.len());
        }
        DeviationResult::Deviates(d) => {
            println!("DEVIATION at order {} in {}", d.deviation_point, d.graph);
            println!("  expected: {:<6} {}", d.expected_actor, d.expected_action);
            println!("  actual:   {:<6} {}", d.actual_actor, d.actual_action);
        }
    }
    if !unobserved.is_empty() {
        let orders: Vec<String> = unobserved.iter().map(u32::to_string).collect();
        println!("unobserved mandatory steps: {}", orders.join(", "));
    }
    Ok(())
}
