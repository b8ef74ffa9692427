//! Persistent graph store using redb.
//!
//! # Table design
//!
//! `reference_graphs` maps the graph name to its JSON encoding.
//!
//! `captured_traces` uses a composite key:
//! ```text
//! [ incident_id bytes | 0x00 | subject_id bytes ]
//! ```
//! All traces of one incident therefore sit in the contiguous key range
//! `[incident_id, 0x00] .. [incident_id, 0x01]`, which makes subject listing
//! and cleanup a single range scan. Incident ids must not contain NUL.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{Result, TriageError};
use crate::graph::{CapturedTrace, Event, ReferenceGraph};

use super::{unavailable, GraphStore};

const REFERENCE_GRAPHS: TableDefinition<&str, &[u8]> = TableDefinition::new("reference_graphs");
const CAPTURED_TRACES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("captured_traces");

fn trace_key(incident_id: &str, subject_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(incident_id.len() + subject_id.len() + 1);
    key.extend_from_slice(incident_id.as_bytes());
    key.push(0x00);
    key.extend_from_slice(subject_id.as_bytes());
    key
}

/// `(inclusive start, exclusive end)` covering every trace of `incident_id`.
fn incident_range(incident_id: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = incident_id.as_bytes().to_vec();
    let mut end = start.clone();
    start.push(0x00);
    end.push(0x01);
    (start, end)
}

fn subject_from_key(key: &[u8], incident_id: &str) -> String {
    String::from_utf8_lossy(&key[incident_id.len() + 1..]).into_owned()
}

fn check_incident_id(incident_id: &str) -> Result<()> {
    if incident_id.contains('\0') {
        return Err(TriageError::GraphStoreUnavailable(
            "incident id contains NUL".into(),
        ));
    }
    Ok(())
}

pub struct RedbGraphStore {
    db: Database,
}

impl RedbGraphStore {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path).map_err(unavailable)?;
        let wt = db.begin_write().map_err(unavailable)?;
        wt.open_table(REFERENCE_GRAPHS).map_err(unavailable)?;
        wt.open_table(CAPTURED_TRACES).map_err(unavailable)?;
        wt.commit().map_err(unavailable)?;
        Ok(Self { db })
    }
}

impl GraphStore for RedbGraphStore {
    fn load_reference_graph(&self, name: &str) -> Result<ReferenceGraph> {
        let rt = self.db.begin_read().map_err(unavailable)?;
        let table = rt.open_table(REFERENCE_GRAPHS).map_err(unavailable)?;
        let Some(value) = table.get(name).map_err(unavailable)? else {
            return Err(TriageError::GraphNotFound(name.to_string()));
        };
        Ok(serde_json::from_slice(value.value())?)
    }

    fn put_reference_graph(&self, graph: &ReferenceGraph) -> Result<()> {
        graph.validate()?;
        let value = serde_json::to_vec(graph)?;
        let wt = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = wt.open_table(REFERENCE_GRAPHS).map_err(unavailable)?;
            table
                .insert(graph.name.as_str(), value.as_slice())
                .map_err(unavailable)?;
        }
        wt.commit().map_err(unavailable)?;
        Ok(())
    }

    fn list_reference_graphs(&self) -> Result<Vec<String>> {
        let rt = self.db.begin_read().map_err(unavailable)?;
        let table = rt.open_table(REFERENCE_GRAPHS).map_err(unavailable)?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(unavailable)? {
            let (k, _) = entry.map_err(unavailable)?;
            names.push(k.value().to_string());
        }
        Ok(names)
    }

    fn ingest_captured_trace(
        &self,
        incident_id: &str,
        subject_id: &str,
        events: &[Event],
    ) -> Result<()> {
        check_incident_id(incident_id)?;
        let key = trace_key(incident_id, subject_id);
        let value = serde_json::to_vec(events)?;
        let wt = self.db.begin_write().map_err(unavailable)?;
        {
            let mut table = wt.open_table(CAPTURED_TRACES).map_err(unavailable)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(unavailable)?;
        }
        wt.commit().map_err(unavailable)?;
        Ok(())
    }

    fn captured_trace(
        &self,
        incident_id: &str,
        subject_id: &str,
    ) -> Result<Option<CapturedTrace>> {
        check_incident_id(incident_id)?;
        let key = trace_key(incident_id, subject_id);
        let rt = self.db.begin_read().map_err(unavailable)?;
        let table = rt.open_table(CAPTURED_TRACES).map_err(unavailable)?;
        let Some(value) = table.get(key.as_slice()).map_err(unavailable)? else {
            return Ok(None);
        };
        let events: Vec<Event> = serde_json::from_slice(value.value())?;
        Ok(Some(CapturedTrace::new(incident_id, subject_id, events)))
    }

    fn captured_subjects(&self, incident_id: &str) -> Result<Vec<String>> {
        check_incident_id(incident_id)?;
        let (start, end) = incident_range(incident_id);
        let rt = self.db.begin_read().map_err(unavailable)?;
        let table = rt.open_table(CAPTURED_TRACES).map_err(unavailable)?;
        let mut subjects = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(unavailable)?
        {
            let (k, _) = entry.map_err(unavailable)?;
            subjects.push(subject_from_key(k.value(), incident_id));
        }
        Ok(subjects)
    }

    fn cleanup_incident(&self, incident_id: &str) -> Result<usize> {
        check_incident_id(incident_id)?;
        let (start, end) = incident_range(incident_id);
        let wt = self.db.begin_write().map_err(unavailable)?;
        let removed = {
            let mut table = wt.open_table(CAPTURED_TRACES).map_err(unavailable)?;
            let mut keys: Vec<Vec<u8>> = Vec::new();
            for entry in table
                .range(start.as_slice()..end.as_slice())
                .map_err(unavailable)?
            {
                let (k, _) = entry.map_err(unavailable)?;
                keys.push(k.value().to_vec());
            }
            for key in &keys {
                table.remove(key.as_slice()).map_err(unavailable)?;
            }
            keys.len()
        };
        wt.commit().map_err(unavailable)?;
        Ok(removed)
    }

    fn health_check(&self) -> bool {
        match self.db.begin_read() {
            Ok(rt) => rt.open_table(REFERENCE_GRAPHS).is_ok(),
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::step;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbGraphStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbGraphStore::open(&dir.path().join("graphs.redb")).unwrap();
        (dir, store)
    }

    fn ev(order: i64, action: &str) -> Event {
        Event {
            order,
            actor: "AMF".into(),
            action: action.into(),
            timestamp: 1_708_000_000,
        }
    }

    #[test]
    fn reference_graph_roundtrip() {
        let (_dir, store) = open_tmp();
        let g = ReferenceGraph::new("Auth", "TS 33.501", vec![step(1, "AMF", "Auth Request")]);
        store.put_reference_graph(&g).unwrap();
        assert_eq!(store.load_reference_graph("Auth").unwrap(), g);
        assert_eq!(store.list_reference_graphs().unwrap(), vec!["Auth"]);
    }

    #[test]
    fn missing_graph_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.load_reference_graph("nope"),
            Err(TriageError::GraphNotFound(_))
        ));
    }

    #[test]
    fn subjects_are_scoped_to_incident() {
        let (_dir, store) = open_tmp();
        store.ingest_captured_trace("inc-1", "a", &[ev(1, "x")]).unwrap();
        store.ingest_captured_trace("inc-1", "b", &[ev(1, "y")]).unwrap();
        // Shares a prefix with "inc-1" but is a different incident.
        store.ingest_captured_trace("inc-10", "c", &[ev(1, "z")]).unwrap();

        assert_eq!(store.captured_subjects("inc-1").unwrap(), vec!["a", "b"]);
        assert_eq!(store.captured_subjects("inc-10").unwrap(), vec!["c"]);
    }

    #[test]
    fn cleanup_then_reads_are_empty() {
        let (_dir, store) = open_tmp();
        store.ingest_captured_trace("inc-1", "a", &[ev(1, "x")]).unwrap();
        store.ingest_captured_trace("inc-1", "b", &[ev(1, "y")]).unwrap();
        store.ingest_captured_trace("inc-10", "c", &[ev(1, "z")]).unwrap();

        assert_eq!(store.cleanup_incident("inc-1").unwrap(), 2);
        assert!(store.captured_subjects("inc-1").unwrap().is_empty());
        assert!(store.captured_trace("inc-1", "a").unwrap().is_none());
        assert!(store.captured_trace("inc-10", "c").unwrap().is_some());
        assert_eq!(store.cleanup_incident("inc-1").unwrap(), 0);
    }

    #[test]
    fn reopen_keeps_graphs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graphs.redb");
        {
            let store = RedbGraphStore::open(&path).unwrap();
            store
                .put_reference_graph(&ReferenceGraph::new("g", "", vec![step(1, "UE", "a")]))
                .unwrap();
        }
        let store = RedbGraphStore::open(&path).unwrap();
        assert!(store.load_reference_graph("g").is_ok());
        assert!(store.health_check());
    }

    #[test]
    fn nul_in_incident_id_is_rejected() {
        let (_dir, store) = open_tmp();
        assert!(store.ingest_captured_trace("a\0b", "s", &[]).is_err());
    }
}
