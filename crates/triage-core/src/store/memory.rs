use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::Result;
use crate::graph::{CapturedTrace, Event, ReferenceGraph};

use super::{unavailable, GraphStore};

/// In-process store. Captured traces are kept per incident so cleanup of one
/// incident is a single map removal.
#[derive(Default)]
pub struct MemoryGraphStore {
    graphs: RwLock<HashMap<String, ReferenceGraph>>,
    traces: RwLock<HashMap<String, BTreeMap<String, Vec<Event>>>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for MemoryGraphStore {
    fn load_reference_graph(&self, name: &str) -> Result<ReferenceGraph> {
        let graphs = self.graphs.read().map_err(unavailable)?;
        graphs
            .get(name)
            .cloned()
            .ok_or_else(|| crate::error::TriageError::GraphNotFound(name.to_string()))
    }

    fn put_reference_graph(&self, graph: &ReferenceGraph) -> Result<()> {
        graph.validate()?;
        let mut graphs = self.graphs.write().map_err(unavailable)?;
        graphs.insert(graph.name.clone(), graph.clone());
        Ok(())
    }

    fn list_reference_graphs(&self) -> Result<Vec<String>> {
        let graphs = self.graphs.read().map_err(unavailable)?;
        let mut names: Vec<String> = graphs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn ingest_captured_trace(
        &self,
        incident_id: &str,
        subject_id: &str,
        events: &[Event],
    ) -> Result<()> {
        let mut traces = self.traces.write().map_err(unavailable)?;
        traces
            .entry(incident_id.to_string())
            .or_default()
            .insert(subject_id.to_string(), events.to_vec());
        Ok(())
    }

    fn captured_trace(
        &self,
        incident_id: &str,
        subject_id: &str,
    ) -> Result<Option<CapturedTrace>> {
        let traces = self.traces.read().map_err(unavailable)?;
        Ok(traces
            .get(incident_id)
            .and_then(|subjects| subjects.get(subject_id))
            .map(|events| CapturedTrace::new(incident_id, subject_id, events.clone())))
    }

    fn captured_subjects(&self, incident_id: &str) -> Result<Vec<String>> {
        let traces = self.traces.read().map_err(unavailable)?;
        Ok(traces
            .get(incident_id)
            .map(|subjects| subjects.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn cleanup_incident(&self, incident_id: &str) -> Result<usize> {
        let mut traces = self.traces.write().map_err(unavailable)?;
        Ok(traces.remove(incident_id).map(|s| s.len()).unwrap_or(0))
    }

    fn health_check(&self) -> bool {
        !self.graphs.is_poisoned() && !self.traces.is_poisoned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::step;
    use std::sync::Arc;

    fn ev(order: i64, action: &str) -> Event {
        Event {
            order,
            actor: "AMF".into(),
            action: action.into(),
            timestamp: 0,
        }
    }

    #[test]
    fn load_missing_graph_is_not_found() {
        let store = MemoryGraphStore::new();
        let err = store.load_reference_graph("x").unwrap_err();
        assert!(matches!(err, crate::error::TriageError::GraphNotFound(_)));
    }

    #[test]
    fn put_rejects_invalid_graph() {
        let store = MemoryGraphStore::new();
        let g = ReferenceGraph::new("g", "", vec![step(2, "UE", "a")]);
        assert!(store.put_reference_graph(&g).is_err());
        assert!(store.list_reference_graphs().unwrap().is_empty());
    }

    #[test]
    fn cleanup_removes_only_that_incident() {
        let store = MemoryGraphStore::new();
        store.ingest_captured_trace("a", "s1", &[ev(1, "x")]).unwrap();
        store.ingest_captured_trace("a", "s2", &[ev(1, "y")]).unwrap();
        store.ingest_captured_trace("b", "s1", &[ev(1, "z")]).unwrap();

        assert_eq!(store.cleanup_incident("a").unwrap(), 2);
        assert!(store.captured_subjects("a").unwrap().is_empty());
        assert!(store.captured_trace("a", "s1").unwrap().is_none());
        let other = store.captured_trace("b", "s1").unwrap().unwrap();
        assert_eq!(other.events[0].action, "z");
    }

    #[test]
    fn detect_deviation_reads_stored_trace() {
        let store = MemoryGraphStore::new();
        store
            .put_reference_graph(&ReferenceGraph::new(
                "g",
                "",
                vec![step(1, "UE", "Hello"), step(2, "AMF", "World")],
            ))
            .unwrap();
        store
            .ingest_captured_trace("inc", "imsi", &[ev(1, "Hello there"), ev(2, "Bye")])
            .unwrap();
        let result = store.detect_deviation("inc", "imsi", "g").unwrap();
        assert_eq!(result.deviation().unwrap().deviation_point, 2);

        // Unknown subject compares as an empty trace.
        assert!(store.detect_deviation("inc", "other", "g").unwrap().conforms());
    }

    #[test]
    fn concurrent_incidents_do_not_interfere() {
        let store = Arc::new(MemoryGraphStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let incident = format!("inc-{i}");
                    for s in 0..20 {
                        store
                            .ingest_captured_trace(&incident, &format!("s{s}"), &[ev(1, "x")])
                            .unwrap();
                    }
                    if i % 2 == 0 {
                        store.cleanup_incident(&incident).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..8 {
            let n = store.captured_subjects(&format!("inc-{i}")).unwrap().len();
            assert_eq!(n, if i % 2 == 0 { 0 } else { 20 });
        }
    }
}
