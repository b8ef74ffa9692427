//! Running and finished incidents, keyed for webhook-driven cancellation.

use super::report::FinalReport;
use super::run::Incident;
use crate::procedure::Alert;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RETAINED_REPORTS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    pub incident_id: String,
    pub alertname: String,
    /// Alert identity (fingerprint) the incident was started for.
    pub alert_identity: String,
    pub status: IncidentStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<FinalReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Running {
    incident_id: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    running: HashMap<String, Running>,
    records: HashMap<String, IncidentRecord>,
    finished: VecDeque<String>,
}

/// Shared by the webhook handlers and the spawned incident runs.
///
/// At most one incident runs per alert identity. Finished records are kept
/// up to `retain` entries, oldest evicted first.
pub struct IncidentRegistry {
    inner: Mutex<Inner>,
    retain: usize,
}

impl Default for IncidentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_REPORTS)
    }
}

impl IncidentRegistry {
    pub fn new(retain: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retain: retain.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a new incident for `alert`. `None` if one is already
    /// running for the same alert identity.
    pub fn register(&self, alert: Alert) -> Option<(Incident, CancellationToken)> {
        let identity = alert.identity();
        let mut inner = self.lock();
        if inner.running.contains_key(&identity) {
            return None;
        }
        let incident = Incident::new(alert);
        let cancel = CancellationToken::new();
        inner.running.insert(
            identity.clone(),
            Running {
                incident_id: incident.id.clone(),
                cancel: cancel.clone(),
            },
        );
        inner.records.insert(
            incident.id.clone(),
            IncidentRecord {
                incident_id: incident.id.clone(),
                alertname: incident.alert.alertname().to_string(),
                alert_identity: identity,
                status: IncidentStatus::Running,
                started_at: Utc::now(),
                report: None,
                error: None,
            },
        );
        Some((incident, cancel))
    }

    /// Cancel the running incident for `identity`, returning its id.
    pub fn cancel(&self, identity: &str) -> Option<String> {
        let inner = self.lock();
        let running = inner.running.get(identity)?;
        running.cancel.cancel();
        Some(running.incident_id.clone())
    }

    pub fn cancel_all(&self) -> usize {
        let inner = self.lock();
        for running in inner.running.values() {
            running.cancel.cancel();
        }
        inner.running.len()
    }

    pub fn complete(&self, identity: &str, report: FinalReport) {
        let incident_id = report.incident_id.clone();
        self.finish(identity, &incident_id, |record| {
            record.status = IncidentStatus::Completed;
            record.report = Some(report);
        });
    }

    pub fn fail(&self, identity: &str, incident_id: &str, error: String) {
        self.finish(identity, incident_id, |record| {
            record.status = IncidentStatus::Failed;
            record.error = Some(error);
        });
    }

    fn finish(&self, identity: &str, incident_id: &str, update: impl FnOnce(&mut IncidentRecord)) {
        let mut inner = self.lock();
        if inner
            .running
            .get(identity)
            .is_some_and(|r| r.incident_id == incident_id)
        {
            inner.running.remove(identity);
        }
        if let Some(record) = inner.records.get_mut(incident_id) {
            update(record);
        }
        inner.finished.push_back(incident_id.to_string());
        while inner.finished.len() > self.retain {
            if let Some(old) = inner.finished.pop_front() {
                inner.records.remove(&old);
            }
        }
    }

    pub fn get(&self, incident_id: &str) -> Option<IncidentRecord> {
        self.lock().records.get(incident_id).cloned()
    }

    /// All known incidents, newest first.
    pub fn list(&self) -> Vec<IncidentRecord> {
        let mut records: Vec<IncidentRecord> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }
}
