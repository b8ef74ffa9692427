pub mod config;
pub mod detect;
pub mod graph;
pub mod serve;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use triage_core::config::{StoreBackend, TriageConfig};
use triage_core::graph::ReferenceGraph;
use triage_core::store::{GraphStore, MemoryGraphStore, RedbGraphStore};

pub fn load_config(path: &Path) -> anyhow::Result<TriageConfig> {
    TriageConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

pub fn graph_dir(config: &TriageConfig, overridden: Option<PathBuf>) -> PathBuf {
    overridden.unwrap_or_else(|| config.store.graph_dir.clone())
}

pub fn load_graphs(dir: &Path) -> anyhow::Result<Vec<ReferenceGraph>> {
    ReferenceGraph::load_dir(dir)
        .with_context(|| format!("failed to load reference graphs from {}", dir.display()))
}

pub fn open_store(config: &TriageConfig) -> anyhow::Result<Arc<dyn GraphStore>> {
    Ok(match &config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryGraphStore::new()),
        StoreBackend::Redb { path } => Arc::new(
            RedbGraphStore::open(path)
                .with_context(|| format!("failed to open graph store {}", path.display()))?,
        ),
    })
}

/// In-memory store holding every graph of `dir`.
pub fn memory_store(dir: &Path) -> anyhow::Result<MemoryGraphStore> {
    let store = MemoryGraphStore::new();
    let graphs = load_graphs(dir)?;
    triage_core::store::import_graphs(&store, &graphs)?;
    Ok(store)
}
