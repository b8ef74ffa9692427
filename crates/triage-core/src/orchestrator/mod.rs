//! Incident orchestration.
//!
//! One [`Orchestrator::run`] per incident drives the state machine in
//! [`state`]: fan out the four collectors, join them, compare constructed
//! traces against the reference graph, ask the [`AnalysisOracle`] once per
//! attempt, and let the confidence gate choose between a wider retry and
//! finalizing. Retries are bounded by `max_attempts`.

pub mod collaborators;
pub mod registry;
pub mod report;
pub mod run;
pub mod state;

pub use collaborators::{
    Analysis, AnalysisOracle, Collaborators, Collector, EvidenceLink, IncidentContext, TimeWindow,
};
pub use registry::{IncidentRecord, IncidentRegistry, IncidentStatus};
pub use report::FinalReport;
pub use run::{Incident, Orchestrator};
pub use state::{
    confidence_gate, effective_threshold, ExecutionState, GateDecision, IncidentState, Phase,
    PhaseStatus,
};
