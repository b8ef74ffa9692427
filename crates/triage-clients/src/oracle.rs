//! Analysis oracle backed by an OpenAI-compatible chat completions endpoint.

use crate::prompt::{parse_answer, render, SYSTEM_PROMPT};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use triage_core::config::EndpointsConfig;
use triage_core::evidence::EvidenceBundle;
use triage_core::orchestrator::{Analysis, AnalysisOracle};
use triage_core::{Result, TriageError};

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmOracle {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmOracle {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        }
    }

    /// The API key is read from the environment variable named in the config.
    pub fn from_config(http: reqwest::Client, endpoints: &EndpointsConfig) -> Self {
        let api_key = std::env::var(&endpoints.llm_api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %endpoints.llm_api_key_env,
                "no LLM API key set; requests are sent unauthenticated"
            );
        }
        Self::new(http, &endpoints.llm_url, &endpoints.llm_model, api_key)
    }
}

fn transport_error(e: reqwest::Error, budget: Duration) -> TriageError {
    if e.is_timeout() {
        TriageError::OracleTimeout(budget)
    } else {
        TriageError::OracleFailed(e.to_string())
    }
}

#[async_trait]
impl AnalysisOracle for LlmOracle {
    async fn analyze(&self, bundle: &EvidenceBundle, budget: Duration) -> Result<Analysis> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": render(bundle)},
            ],
        });

        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(budget)
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| transport_error(e, budget))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TriageError::OracleFailed(format!(
                "LLM endpoint returned HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        let chat: ChatResponse = resp.json().await.map_err(|e| transport_error(e, budget))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TriageError::OracleFailed("LLM response had no content".into()))?;

        let analysis = parse_answer(&content).map_err(TriageError::OracleFailed)?;
        tracing::debug!(
            root_cause = %analysis.root_cause,
            confidence = analysis.confidence,
            "analysis received"
        );
        Ok(analysis)
    }
}
