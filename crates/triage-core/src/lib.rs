pub mod annotate;
pub mod config;
pub mod deviation;
pub mod error;
pub mod evidence;
pub mod graph;
pub mod infra;
pub mod io;
pub mod orchestrator;
pub mod procedure;
pub mod store;

pub use error::{Result, TriageError};
