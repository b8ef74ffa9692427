use crate::error::{Result, TriageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

/// How the metrics, logs and trace collectors are scheduled relative to each
/// other. The infrastructure collector always runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    /// metrics ∥ (logs → traces): trace construction gets the subjects
    /// discovered in logs.
    Chained,
    /// All three at once; the trace collector discovers subjects itself.
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_collector_timeout")]
    pub collector_timeout_secs: u64,
    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,
    #[serde(default = "default_collection_mode")]
    pub collection_mode: CollectionMode,
    #[serde(default = "default_window_before")]
    pub window_before_secs: i64,
    #[serde(default = "default_window_after")]
    pub window_after_secs: i64,
    /// Extra seconds added before the window on every retry.
    #[serde(default = "default_retry_expansion")]
    pub retry_window_expansion_secs: i64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_collector_timeout() -> u64 {
    10
}

fn default_oracle_timeout() -> u64 {
    30
}

fn default_collection_mode() -> CollectionMode {
    CollectionMode::Chained
}

fn default_window_before() -> i64 {
    300
}

fn default_window_after() -> i64 {
    60
}

fn default_retry_expansion() -> i64 {
    300
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            collector_timeout_secs: default_collector_timeout(),
            oracle_timeout_secs: default_oracle_timeout(),
            collection_mode: default_collection_mode(),
            window_before_secs: default_window_before(),
            window_after_secs: default_window_after(),
            retry_window_expansion_secs: default_retry_expansion(),
        }
    }
}

impl OrchestratorConfig {
    pub fn collector_timeout(&self) -> Duration {
        Duration::from_secs(self.collector_timeout_secs)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// EvidenceQualityTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceQualityTable {
    #[serde(default = "eq_all")]
    pub all_sources: f64,
    #[serde(default = "eq_traces_plus_one")]
    pub traces_plus_one: f64,
    #[serde(default = "eq_metrics_logs")]
    pub metrics_logs: f64,
    #[serde(default = "eq_traces_only")]
    pub traces_only: f64,
    #[serde(default = "eq_metrics_only")]
    pub metrics_only: f64,
    #[serde(default = "eq_logs_only")]
    pub logs_only: f64,
    #[serde(default = "eq_none")]
    pub no_evidence: f64,
}

fn eq_all() -> f64 {
    0.95
}
fn eq_traces_plus_one() -> f64 {
    0.85
}
fn eq_metrics_logs() -> f64 {
    0.80
}
fn eq_traces_only() -> f64 {
    0.50
}
fn eq_metrics_only() -> f64 {
    0.40
}
fn eq_logs_only() -> f64 {
    0.35
}
fn eq_none() -> f64 {
    0.10
}

impl Default for EvidenceQualityTable {
    fn default() -> Self {
        Self {
            all_sources: eq_all(),
            traces_plus_one: eq_traces_plus_one(),
            metrics_logs: eq_metrics_logs(),
            traces_only: eq_traces_only(),
            metrics_only: eq_metrics_only(),
            logs_only: eq_logs_only(),
            no_evidence: eq_none(),
        }
    }
}

impl EvidenceQualityTable {
    fn entries(&self) -> [(&'static str, f64); 7] {
        [
            ("all_sources", self.all_sources),
            ("traces_plus_one", self.traces_plus_one),
            ("metrics_logs", self.metrics_logs),
            ("traces_only", self.traces_only),
            ("metrics_only", self.metrics_only),
            ("logs_only", self.logs_only),
            ("no_evidence", self.no_evidence),
        ]
    }
}

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_high_quality_cutoff")]
    pub high_quality_cutoff: f64,
    #[serde(default = "default_threshold_high_quality")]
    pub threshold_high_quality: f64,
    #[serde(default = "default_threshold")]
    pub threshold_default: f64,
}

fn default_high_quality_cutoff() -> f64 {
    0.80
}

fn default_threshold_high_quality() -> f64 {
    0.65
}

fn default_threshold() -> f64 {
    0.70
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            high_quality_cutoff: default_high_quality_cutoff(),
            threshold_high_quality: default_threshold_high_quality(),
            threshold_default: default_threshold(),
        }
    }
}

// ---------------------------------------------------------------------------
// InfraConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default = "w_restarts")]
    pub weight_restarts: f64,
    #[serde(default = "w_oom")]
    pub weight_oom: f64,
    #[serde(default = "w_pod_status")]
    pub weight_pod_status: f64,
    #[serde(default = "w_resources")]
    pub weight_resources: f64,
    /// Restart counts at or above this use `restart_factor_high`.
    #[serde(default = "restart_high")]
    pub restart_threshold_high: f64,
    /// Restart counts above this max out the restart factor.
    #[serde(default = "restart_critical")]
    pub restart_threshold_critical: f64,
    #[serde(default = "restart_factor_low")]
    pub restart_factor_low: f64,
    #[serde(default = "restart_factor_high")]
    pub restart_factor_high: f64,
    #[serde(default = "pending_factor")]
    pub pod_pending_factor: f64,
    #[serde(default = "memory_pct")]
    pub memory_saturation_pct: f64,
    #[serde(default = "cpu_cores")]
    pub cpu_saturation_cores: f64,
    #[serde(default = "cpu_factor")]
    pub cpu_saturation_factor: f64,
}

fn w_restarts() -> f64 {
    0.35
}
fn w_oom() -> f64 {
    0.25
}
fn w_pod_status() -> f64 {
    0.20
}
fn w_resources() -> f64 {
    0.20
}
fn restart_high() -> f64 {
    3.0
}
fn restart_critical() -> f64 {
    5.0
}
fn restart_factor_low() -> f64 {
    0.4
}
fn restart_factor_high() -> f64 {
    0.7
}
fn pending_factor() -> f64 {
    0.6
}
fn memory_pct() -> f64 {
    90.0
}
fn cpu_cores() -> f64 {
    1.0
}
fn cpu_factor() -> f64 {
    0.8
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            weight_restarts: w_restarts(),
            weight_oom: w_oom(),
            weight_pod_status: w_pod_status(),
            weight_resources: w_resources(),
            restart_threshold_high: restart_high(),
            restart_threshold_critical: restart_critical(),
            restart_factor_low: restart_factor_low(),
            restart_factor_high: restart_factor_high(),
            pod_pending_factor: pending_factor(),
            memory_saturation_pct: memory_pct(),
            cpu_saturation_cores: cpu_cores(),
            cpu_saturation_factor: cpu_factor(),
        }
    }
}

// ---------------------------------------------------------------------------
// EndpointsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_prometheus")]
    pub prometheus_url: String,
    #[serde(default = "default_loki")]
    pub loki_url: String,
    #[serde(default = "default_llm_url")]
    pub llm_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// Name of the environment variable holding the LLM API key.
    #[serde(default = "default_llm_key_env")]
    pub llm_api_key_env: String,
    #[serde(default = "default_namespace")]
    pub core_namespace: String,
}

fn default_prometheus() -> String {
    "http://kube-prom-kube-prometheus-prometheus.monitoring:9090".to_string()
}

fn default_loki() -> String {
    "http://loki.monitoring:3100".to_string()
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_key_env() -> String {
    "LLM_API_KEY".to_string()
}

fn default_namespace() -> String {
    "5g-core".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            prometheus_url: default_prometheus(),
            loki_url: default_loki(),
            llm_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key_env: default_llm_key_env(),
            core_namespace: default_namespace(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProceduresConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureRule {
    /// Case-insensitive substrings of the alert name.
    pub keywords: Vec<String>,
    pub graph: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduresConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<ProcedureRule>,
    /// Graph chosen from the alert's `nf` label when no rule matches.
    #[serde(default = "default_nf_defaults")]
    pub nf_defaults: std::collections::BTreeMap<String, String>,
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_rules() -> Vec<ProcedureRule> {
    vec![
        ProcedureRule {
            keywords: vec!["auth".into()],
            graph: "Authentication_5G_AKA".into(),
        },
        ProcedureRule {
            keywords: vec!["registration".into(), "attach".into()],
            graph: "Registration_General".into(),
        },
        ProcedureRule {
            keywords: vec!["pdu".into(), "session".into()],
            graph: "PDU_Session_Establishment".into(),
        },
    ]
}

fn default_nf_defaults() -> std::collections::BTreeMap<String, String> {
    [
        ("ausf", "Authentication_5G_AKA"),
        ("amf", "Registration_General"),
        ("udm", "Registration_General"),
        ("smf", "PDU_Session_Establishment"),
        ("upf", "PDU_Session_Establishment"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_fallback() -> String {
    "Registration_General".to_string()
}

impl Default for ProceduresConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            nf_defaults: default_nf_defaults(),
            fallback: default_fallback(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redb { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Directory of reference graph YAML files imported at startup.
    #[serde(default = "default_graph_dir")]
    pub graph_dir: PathBuf,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_graph_dir() -> PathBuf {
    PathBuf::from("dags")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            graph_dir: default_graph_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// TriageConfig
// ---------------------------------------------------------------------------

pub const DEFAULT_CONFIG_FILE: &str = "triage.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub evidence_quality: EvidenceQualityTable,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub infra: InfraConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub procedures: ProceduresConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Regex whose first capture group is a trace subject id (IMSI).
    #[serde(default = "default_subject_pattern")]
    pub subject_pattern: String,
}

fn default_version() -> u32 {
    1
}

fn default_subject_pattern() -> String {
    r"imsi-(\d{14,15})".to_string()
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            orchestrator: OrchestratorConfig::default(),
            evidence_quality: EvidenceQualityTable::default(),
            gate: GateConfig::default(),
            infra: InfraConfig::default(),
            endpoints: EndpointsConfig::default(),
            procedures: ProceduresConfig::default(),
            store: StoreConfig::default(),
            subject_pattern: default_subject_pattern(),
        }
    }
}

impl TriageConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: TriageConfig = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn subject_regex(&self) -> Result<regex::Regex> {
        regex::Regex::new(&self.subject_pattern)
            .map_err(|e| TriageError::Config(format!("invalid subject_pattern: {e}")))
    }

    /// Check the config for mistakes that would silently change incident outcomes.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        if self.orchestrator.max_attempts == 0 {
            push(
                WarnLevel::Error,
                "orchestrator.max_attempts must be at least 1".into(),
            );
        }
        if self.orchestrator.collector_timeout_secs == 0 {
            push(
                WarnLevel::Error,
                "orchestrator.collector_timeout_secs must be positive".into(),
            );
        }
        if self.orchestrator.oracle_timeout_secs == 0 {
            push(
                WarnLevel::Error,
                "orchestrator.oracle_timeout_secs must be positive".into(),
            );
        }

        for (name, value) in self.evidence_quality.entries() {
            if !(0.0..=1.0).contains(&value) {
                push(
                    WarnLevel::Warning,
                    format!("evidence_quality.{name} = {value} is outside [0, 1] and will be clamped"),
                );
            }
        }

        for (name, value) in [
            ("high_quality_cutoff", self.gate.high_quality_cutoff),
            ("threshold_high_quality", self.gate.threshold_high_quality),
            ("threshold_default", self.gate.threshold_default),
        ] {
            if !(0.0..=1.0).contains(&value) {
                push(WarnLevel::Error, format!("gate.{name} = {value} is outside [0, 1]"));
            }
        }

        let weights = self.infra.weight_restarts
            + self.infra.weight_oom
            + self.infra.weight_pod_status
            + self.infra.weight_resources;
        if (weights - 1.0).abs() > 1e-6 {
            push(
                WarnLevel::Warning,
                format!("infra weights sum to {weights:.2}, expected 1.00"),
            );
        }
        if self.infra.restart_threshold_high > self.infra.restart_threshold_critical {
            push(
                WarnLevel::Warning,
                "infra.restart_threshold_high exceeds restart_threshold_critical".into(),
            );
        }

        for (name, url) in [
            ("prometheus_url", &self.endpoints.prometheus_url),
            ("loki_url", &self.endpoints.loki_url),
            ("llm_url", &self.endpoints.llm_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                push(
                    WarnLevel::Error,
                    format!("endpoints.{name} must start with http:// or https://"),
                );
            }
        }

        if let Err(e) = self.subject_regex() {
            push(WarnLevel::Error, e.to_string());
        } else if self.subject_regex().is_ok_and(|r| r.captures_len() < 2) {
            push(
                WarnLevel::Error,
                "subject_pattern needs a capture group for the subject id".into(),
            );
        }

        if self.procedures.fallback.trim().is_empty() {
            push(
                WarnLevel::Error,
                "procedures.fallback must name a reference graph".into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
