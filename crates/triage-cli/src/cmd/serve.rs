use super::{load_config, load_graphs, open_store};
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use triage_core::config::WarnLevel;
use triage_core::orchestrator::{IncidentRegistry, Orchestrator};
use triage_core::store::import_graphs;
use triage_server::AppState;

pub fn run(config_path: &Path, listen: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => anyhow::bail!("invalid config: {}", w.message),
        }
    }

    let store = open_store(&config)?;
    let dir = &config.store.graph_dir;
    if dir.is_dir() {
        let graphs = load_graphs(dir)?;
        let names = import_graphs(store.as_ref(), &graphs).context("failed to import graphs")?;
        tracing::info!(dir = %dir.display(), graphs = ?names, "reference graphs imported");
    } else {
        tracing::warn!(dir = %dir.display(), "graph directory missing; using stored graphs only");
    }

    let (collaborators, backends) =
        triage_clients::build(&config, store.clone()).context("failed to set up collaborators")?;
    let registry = Arc::new(IncidentRegistry::default());
    let orchestrator = Arc::new(Orchestrator::new(collaborators, Arc::new(config)));
    let state = AppState::new(orchestrator, registry.clone(), store).with_backends(backends);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind {listen}"))?;
        println!("triage listening on http://{}", listener.local_addr()?);

        let shutdown = async move {
            let _ = tokio::signal::ctrl_c().await;
            let cancelled = registry.cancel_all();
            tracing::info!(cancelled, "shutting down");
        };
        triage_server::serve_on(listener, state, shutdown).await
    })
}
