use std::sync::Arc;
use triage_clients::Backends;
use triage_core::orchestrator::{IncidentRegistry, Orchestrator};
use triage_core::store::GraphStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<IncidentRegistry>,
    pub store: Arc<dyn GraphStore>,
    /// Telemetry backends probed by `/health`. `None` skips the probes.
    pub backends: Option<Backends>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        registry: Arc<IncidentRegistry>,
        store: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            store,
            backends: None,
        }
    }

    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }
}
