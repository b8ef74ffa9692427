//! First-mismatch detection between a captured trace and a reference graph.
//!
//! # Matching rule
//!
//! Reference steps are scanned in increasing order. A step whose order has a
//! captured event *matches* when the event's action contains the step's
//! canonical action as a literal, case-sensitive substring. The first step
//! that has an event but does not match is the deviation point. Steps with no
//! corresponding event are never flagged: absence is not a deviation here
//! (see [`unobserved_mandatory_steps`] for the separate visibility report).
//! `match_keywords` play no part in this rule.
//!
//! # Sub-graph windows
//!
//! A step at order `k` that nests a sub-graph owns the captured orders
//! `k * SUB_GRAPH_STRIDE + j` for the sub-graph's step `j`. The window is
//! applied recursively (a step `j` inside that sub-graph nesting another graph
//! owns `(k * STRIDE + j) * STRIDE + i`), up to [`MAX_SUB_GRAPH_DEPTH`] levels.
//! The sub-graph is scanned right after its parent step, before the parent's
//! next step.

use crate::error::{Result, TriageError};
use crate::graph::{CapturedTrace, Event, ReferenceGraph};
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SUB_GRAPH_STRIDE: i64 = 1000;
pub const MAX_SUB_GRAPH_DEPTH: usize = 4;

// ---------------------------------------------------------------------------
// DeviationResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deviation {
    /// Captured-event order at which the mismatch occurred (windowed for
    /// sub-graph steps).
    pub deviation_point: i64,
    pub expected_action: String,
    pub actual_action: String,
    /// Graph owning the mismatching step (differs from the requested graph
    /// when the mismatch is inside a nested sub-graph).
    pub graph: String,
    pub expected_actor: String,
    pub actual_actor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviationResult {
    Conforms,
    Deviates(Deviation),
}

impl DeviationResult {
    pub fn conforms(&self) -> bool {
        matches!(self, DeviationResult::Conforms)
    }

    pub fn deviation(&self) -> Option<&Deviation> {
        match self {
            DeviationResult::Conforms => None,
            DeviationResult::Deviates(d) => Some(d),
        }
    }
}

// ---------------------------------------------------------------------------
// DeviationEngine
// ---------------------------------------------------------------------------

/// Pulls reference graphs from a [`GraphStore`] and compares traces against
/// them. Holds no state between calls, so `detect` is deterministic.
pub struct DeviationEngine<'a, S: GraphStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: GraphStore + ?Sized> DeviationEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Compare `trace` against the reference graph named `graph_name`.
    ///
    /// Fails with `GraphNotFound` if the graph (or any sub-graph reached
    /// during the scan) does not exist.
    pub fn detect(&self, graph_name: &str, trace: &CapturedTrace) -> Result<DeviationResult> {
        let graph = self.store.load_reference_graph(graph_name)?;
        self.detect_graph(&graph, trace)
    }

    /// Same as [`detect`](Self::detect) for an already loaded graph.
    pub fn detect_graph(
        &self,
        graph: &ReferenceGraph,
        trace: &CapturedTrace,
    ) -> Result<DeviationResult> {
        let index = index_events(&trace.events);
        let mut scan = Scan {
            store: self.store,
            index: &index,
            sub_graphs: HashMap::new(),
        };
        match scan.run(graph, 0, 0)? {
            Some(d) => Ok(DeviationResult::Deviates(d)),
            None => Ok(DeviationResult::Conforms),
        }
    }
}

/// Index events by order. The first event at a given order wins.
fn index_events(events: &[Event]) -> HashMap<i64, &Event> {
    let mut index = HashMap::with_capacity(events.len());
    for event in events {
        index.entry(event.order).or_insert(event);
    }
    index
}

struct Scan<'s, 'e, S: GraphStore + ?Sized> {
    store: &'s S,
    index: &'e HashMap<i64, &'e Event>,
    sub_graphs: HashMap<String, ReferenceGraph>,
}

impl<S: GraphStore + ?Sized> Scan<'_, '_, S> {
    fn run(&mut self, graph: &ReferenceGraph, base: i64, depth: usize) -> Result<Option<Deviation>> {
        for step in graph.ordered_steps() {
            let key = base + i64::from(step.order);

            if let Some(event) = self.index.get(&key) {
                if !event.action.contains(step.canonical_action.as_str()) {
                    return Ok(Some(Deviation {
                        deviation_point: key,
                        expected_action: step.canonical_action.clone(),
                        actual_action: event.action.clone(),
                        graph: graph.name.clone(),
                        expected_actor: step.actor.clone(),
                        actual_actor: event.actor.clone(),
                    }));
                }
            }

            let Some(sub_name) = step.sub_graph.as_deref() else {
                continue;
            };
            if depth + 1 > MAX_SUB_GRAPH_DEPTH {
                return Err(TriageError::InvalidGraph {
                    name: graph.name.clone(),
                    reason: format!(
                        "sub-graph nesting deeper than {MAX_SUB_GRAPH_DEPTH} levels at step {}",
                        step.order
                    ),
                });
            }
            let sub = self.sub_graph(sub_name)?;
            if let Some(d) = self.run(&sub, key * SUB_GRAPH_STRIDE, depth + 1)? {
                return Ok(Some(d));
            }
        }
        Ok(None)
    }

    fn sub_graph(&mut self, name: &str) -> Result<ReferenceGraph> {
        if let Some(g) = self.sub_graphs.get(name) {
            return Ok(g.clone());
        }
        let g = self.store.load_reference_graph(name)?;
        self.sub_graphs.insert(name.to_string(), g.clone());
        Ok(g)
    }
}

/// Mandatory top-level steps for which the trace holds no event at all.
///
/// Reported for visibility only; the deviation rule never flags them.
pub fn unobserved_mandatory_steps(graph: &ReferenceGraph, trace: &CapturedTrace) -> Vec<u32> {
    let index = index_events(&trace.events);
    graph
        .ordered_steps()
        .into_iter()
        .filter(|s| !s.optional && !index.contains_key(&i64::from(s.order)))
        .map(|s| s.order)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
