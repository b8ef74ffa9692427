use super::{graph_dir, load_config, load_graphs};
use crate::output::{print_json, print_table};
use clap::Subcommand;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use triage_core::graph::ReferenceGraph;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum GraphSubcommand {
    /// List reference graphs
    List {
        #[arg(long)]
        graph_dir: Option<PathBuf>,
    },

    /// Validate every reference graph and its sub-graph references
    Validate {
        #[arg(long)]
        graph_dir: Option<PathBuf>,
    },

    /// Show the steps of one reference graph
    Show {
        name: String,
        #[arg(long)]
        graph_dir: Option<PathBuf>,
    },
}

pub fn run(config_path: &Path, subcmd: GraphSubcommand, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    match subcmd {
        GraphSubcommand::List { graph_dir: dir } => list(&graph_dir(&config, dir), json),
        GraphSubcommand::Validate { graph_dir: dir } => validate(&graph_dir(&config, dir), json),
        GraphSubcommand::Show {
            name,
            graph_dir: dir,
        } => show(&graph_dir(&config, dir), &name, json),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(dir: &Path, json: bool) -> anyhow::Result<()> {
    let graphs = load_graphs(dir)?;
    if json {
        let value: Vec<_> = graphs
            .iter()
            .map(|g| {
                serde_json::json!({
                    "name": g.name,
                    "spec": g.spec,
                    "steps": g.steps.len(),
                    "actors": g.actors(),
                })
            })
            .collect();
        return print_json(&value);
    }
    if graphs.is_empty() {
        println!("No reference graphs in {}.", dir.display());
        return Ok(());
    }
    let rows: Vec<Vec<String>> = graphs
        .iter()
        .map(|g| {
            vec![
                g.name.clone(),
                g.steps.len().to_string(),
                g.actors().join(","),
                g.spec.clone(),
            ]
        })
        .collect();
    print_table(&["NAME", "STEPS", "ACTORS", "SPEC"], &rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// Problems across a set of graphs: structural errors and dangling
/// sub-graph references.
fn problems(graphs: &[ReferenceGraph]) -> Vec<String> {
    let names: BTreeSet<&str> = graphs.iter().map(|g| g.name.as_str()).collect();
    let mut out = Vec::new();
    for g in graphs {
        if let Err(e) = g.validate() {
            out.push(e.to_string());
        }
        for step in &g.steps {
            if let Some(sub) = &step.sub_graph {
                if !names.contains(sub.as_str()) {
                    out.push(format!(
                        "{}: step {} nests unknown graph '{sub}'",
                        g.name, step.order
                    ));
                }
            }
        }
    }
    out
}

fn validate(dir: &Path, json: bool) -> anyhow::Result<()> {
    let graphs = load_graphs(dir)?;
    let problems = problems(&graphs);

    if json {
        print_json(&serde_json::json!({
            "graphs": graphs.len(),
            "problems": problems,
        }))?;
    } else if problems.is_empty() {
        println!("{} reference graph(s) valid.", graphs.len());
    } else {
        for p in &problems {
            println!("[error] {p}");
        }
    }

    if !problems.is_empty() {
        anyhow::bail!("reference graph validation found {} problem(s)", problems.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(dir: &Path, name: &str, json: bool) -> anyhow::Result<()> {
    let graph = load_graphs(dir)?
        .into_iter()
        .find(|g| g.name == name)
        .ok_or_else(|| anyhow::anyhow!("reference graph '{name}' not found in {}", dir.display()))?;

    if json {
        return print_json(&graph);
    }
    println!("{} ({})", graph.name, graph.spec);
    let rows: Vec<Vec<String>> = graph
        .ordered_steps()
        .into_iter()
        .map(|s| {
            vec![
                s.order.to_string(),
                s.actor.clone(),
                s.canonical_action.clone(),
                if s.optional { "yes" } else { "" }.to_string(),
                s.sub_graph.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["ORDER", "ACTOR", "ACTION", "OPTIONAL", "SUB-GRAPH"], &rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::graph::Step;

    fn step(order: u32, sub_graph: Option<&str>) -> Step {
        Step {
            order,
            actor: "AMF".into(),
            canonical_action: format!("step {order}"),
            match_keywords: vec![],
            optional: false,
            sub_graph: sub_graph.map(str::to_string),
        }
    }

    #[test]
    fn dangling_sub_graph_is_reported() {
        let graphs = vec![ReferenceGraph::new(
            "Parent",
            "",
            vec![step(1, None), step(2, Some("Missing"))],
        )];
        let found = problems(&graphs);
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("Missing"));
    }

    #[test]
    fn gaps_in_orders_are_reported() {
        let graphs = vec![ReferenceGraph::new("Gappy", "", vec![step(1, None), step(3, None)])];
        assert_eq!(problems(&graphs).len(), 1);
    }
}
