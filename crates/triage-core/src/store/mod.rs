//! Reference-graph and captured-trace storage.
//!
//! The store is the only state shared across incidents. Reads may come from
//! any number of incidents at once; writes to captured traces are namespaced
//! by `incident_id` so one incident can never observe or remove another's
//! traces.

pub mod memory;
pub mod redb_store;

pub use self::memory::MemoryGraphStore;
pub use self::redb_store::RedbGraphStore;

use crate::deviation::{DeviationEngine, DeviationResult};
use crate::error::{Result, TriageError};
use crate::graph::{CapturedTrace, Event, ReferenceGraph};

pub trait GraphStore: Send + Sync {
    /// Fails with `GraphNotFound` if no graph has this name.
    fn load_reference_graph(&self, name: &str) -> Result<ReferenceGraph>;

    /// Insert or replace a reference graph. Invalid graphs are rejected.
    fn put_reference_graph(&self, graph: &ReferenceGraph) -> Result<()>;

    fn list_reference_graphs(&self) -> Result<Vec<String>>;

    /// Store (or replace) the captured trace for `(incident_id, subject_id)`.
    fn ingest_captured_trace(
        &self,
        incident_id: &str,
        subject_id: &str,
        events: &[Event],
    ) -> Result<()>;

    fn captured_trace(&self, incident_id: &str, subject_id: &str)
        -> Result<Option<CapturedTrace>>;

    /// Subjects with a captured trace under `incident_id`, sorted.
    fn captured_subjects(&self, incident_id: &str) -> Result<Vec<String>>;

    /// Remove every captured trace of `incident_id`. Returns how many were removed.
    fn cleanup_incident(&self, incident_id: &str) -> Result<usize>;

    fn health_check(&self) -> bool;

    /// Compare the stored trace of `(incident_id, subject_id)` against `graph_name`.
    ///
    /// Computed by [`DeviationEngine`] over the raw graph and trace data. A
    /// subject with no stored trace compares as an empty trace and conforms.
    fn detect_deviation(
        &self,
        incident_id: &str,
        subject_id: &str,
        graph_name: &str,
    ) -> Result<DeviationResult> {
        let trace = self
            .captured_trace(incident_id, subject_id)?
            .unwrap_or_else(|| CapturedTrace::new(incident_id, subject_id, Vec::new()));
        DeviationEngine::new(self).detect(graph_name, &trace)
    }
}

/// Import every graph in `graphs` into `store`, returning the names stored.
pub fn import_graphs(store: &dyn GraphStore, graphs: &[ReferenceGraph]) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(graphs.len());
    for g in graphs {
        store.put_reference_graph(g)?;
        names.push(g.name.clone());
    }
    Ok(names)
}

pub(crate) fn unavailable(e: impl std::fmt::Display) -> TriageError {
    TriageError::GraphStoreUnavailable(e.to_string())
}
