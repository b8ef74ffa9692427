//! PromQL and LogQL query builders.

use triage_core::graph::ReferenceGraph;

/// Pod-level queries feeding the infrastructure score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraQueries {
    pub restarts: String,
    pub oom_kills: String,
    pub pod_status: String,
    pub memory_percent: String,
    pub cpu_usage: String,
}

fn pod_regex(nfs: &[String]) -> String {
    if nfs.is_empty() {
        ".*".to_string()
    } else {
        format!("({}).*", nfs.join("|"))
    }
}

pub fn infra_queries(namespace: &str, nfs: &[String]) -> InfraQueries {
    let sel = format!(r#"namespace="{namespace}",pod=~"{}""#, pod_regex(nfs));
    InfraQueries {
        restarts: format!("increase(kube_pod_container_status_restarts_total{{{sel}}}[1h])"),
        oom_kills: format!(
            r#"kube_pod_container_status_last_terminated_reason{{{sel},reason="OOMKilled"}} > 0"#
        ),
        pod_status: format!("kube_pod_status_phase{{{sel}}} == 1"),
        memory_percent: format!(
            "100 * container_memory_working_set_bytes{{{sel},container!=\"\"}} \
             / container_spec_memory_limit_bytes{{{sel},container!=\"\"}} > 0"
        ),
        cpu_usage: format!("rate(container_cpu_usage_seconds_total{{{sel},container!=\"\"}}[5m])"),
    }
}

/// `(series name, PromQL)` pairs collected per NF.
pub fn nf_metric_queries(nf: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "error_rate",
            format!(r#"rate(http_requests_total{{nf="{nf}",status=~"5.."}}[1m])"#),
        ),
        (
            "latency_p95",
            format!(r#"histogram_quantile(0.95, rate(http_request_duration_seconds_bucket{{nf="{nf}"}}[1m]))"#),
        ),
        (
            "cpu_usage",
            format!(r#"rate(container_cpu_usage_seconds_total{{pod=~".*{nf}.*"}}[5m])"#),
        ),
        (
            "memory_bytes",
            format!(r#"container_memory_working_set_bytes{{pod=~".*{nf}.*"}}"#),
        ),
    ]
}

fn stream_selector(namespace: &str, nf: &str) -> String {
    format!(r#"{{k8s_namespace_name="{namespace}",k8s_pod_name=~".*{nf}.*"}}"#)
}

/// Warning and error lines of one NF.
pub fn nf_error_log_query(namespace: &str, nf: &str) -> String {
    format!(r#"{} |~ "ERROR|WARN|FATAL""#, stream_selector(namespace, nf))
}

/// Lines of one NF matching any keyword of the graph steps it performs.
/// `None` when the NF performs no step with keywords.
pub fn nf_phase_log_query(namespace: &str, nf: &str, graph: &ReferenceGraph) -> Option<String> {
    let patterns: Vec<String> = graph
        .ordered_steps()
        .into_iter()
        .filter(|s| s.actor.eq_ignore_ascii_case(nf))
        .flat_map(|s| s.match_keywords.iter())
        .map(|k| keyword_to_logql(k))
        .collect();
    if patterns.is_empty() {
        return None;
    }
    Some(format!(
        "{} |~ `(?i)({})`",
        stream_selector(namespace, nf),
        patterns.join("|")
    ))
}

/// Any line in the namespace matching the subject pattern.
pub fn subject_discovery_query(namespace: &str, subject_pattern: &str) -> String {
    format!(r#"{{k8s_namespace_name="{namespace}"}} |~ `{subject_pattern}`"#)
}

/// Every line in the namespace mentioning `subject`.
pub fn subject_trace_query(namespace: &str, subject: &str) -> String {
    format!(r#"{{k8s_namespace_name="{namespace}"}} |= "{subject}""#)
}

fn keyword_to_logql(keyword: &str) -> String {
    keyword
        .split('*')
        .map(|part| regex::escape(part).replace('`', ""))
        .collect::<Vec<_>>()
        .join(".*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::graph::{ReferenceGraph, Step};

    fn step(order: u32, actor: &str, keywords: &[&str]) -> Step {
        Step {
            order,
            actor: actor.into(),
            canonical_action: format!("step {order}"),
            match_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            optional: false,
            sub_graph: None,
        }
    }

    #[test]
    fn infra_selector_scopes_namespace_and_nfs() {
        let q = infra_queries("5g-core", &["amf".into(), "smf".into()]);
        assert!(q.restarts.contains(r#"namespace="5g-core",pod=~"(amf|smf).*""#));
        assert!(q.oom_kills.contains(r#"reason="OOMKilled""#));
        assert!(q.pod_status.starts_with("kube_pod_status_phase{"));

        let all = infra_queries("ns", &[]);
        assert!(all.cpu_usage.contains(r#"pod=~".*""#));
    }

    #[test]
    fn error_log_query_shape() {
        assert_eq!(
            nf_error_log_query("5g-core", "amf"),
            r#"{k8s_namespace_name="5g-core",k8s_pod_name=~".*amf.*"} |~ "ERROR|WARN|FATAL""#
        );
    }

    #[test]
    fn phase_query_uses_only_steps_of_that_nf() {
        let graph = ReferenceGraph::new(
            "G",
            "TS 23.502",
            vec![
                step(1, "UE", &["*registration request*"]),
                step(2, "AMF", &["*registration request*", "Registration.Request"]),
                step(3, "AUSF", &["*5g-aka*"]),
            ],
        );
        let q = nf_phase_log_query("ns", "amf", &graph).unwrap();
        assert!(q.ends_with(r"|~ `(?i)(.*registration request.*|Registration\.Request)`"));
        assert!(nf_phase_log_query("ns", "smf", &graph).is_none());
    }

    #[test]
    fn subject_queries() {
        assert_eq!(
            subject_trace_query("ns", "001010000000001"),
            r#"{k8s_namespace_name="ns"} |= "001010000000001""#
        );
        assert!(subject_discovery_query("ns", r"imsi-(\d{15})").ends_with(r"`imsi-(\d{15})`"));
    }
}
