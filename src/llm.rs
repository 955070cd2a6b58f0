//! Language-model endpoint access.
//!
//! [`LlmProvider`] is the answering side of a QA pipeline: one prompt in,
//! one completion out. Providers are bound to a model and an endpoint when
//! they are created by an [`LlmConnector`], so a pipeline cached for one
//! endpoint can never silently talk to another.
//!
//! The stock implementation talks to an Ollama server:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | [`LlmProvider::generate`] | `POST /api/generate` (non-streaming) |
//! | [`list_models`] | `GET /api/tags` |

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model(&self) -> &str;

    fn endpoint(&self) -> &str;

    /// Complete `prompt`. Never retried.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Creates providers bound to a model and endpoint.
pub trait LlmConnector: Send + Sync {
    fn connect(&self, model: &str, endpoint: &str) -> Result<Arc<dyn LlmProvider>>;
}

// ============ Ollama ============

pub struct OllamaClient {
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(model: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::Config("no language model selected".to_string()));
        }
        if endpoint.trim().is_empty() {
            return Err(Error::Config("no language model endpoint set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;
        Ok(Self {
            model: model.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl LlmProvider for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::Provider(format!(
                    "cannot reach language model at {}: {}",
                    self.endpoint, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "language model error {}: {}",
                status, body_text
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed generate response: {}", e)))?;
        Ok(parsed.response)
    }
}

/// Connector producing [`OllamaClient`]s with a fixed request timeout.
#[derive(Debug, Clone)]
pub struct OllamaConnector {
    timeout: Duration,
}

impl OllamaConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl LlmConnector for OllamaConnector {
    fn connect(&self, model: &str, endpoint: &str) -> Result<Arc<dyn LlmProvider>> {
        Ok(Arc::new(OllamaClient::new(model, endpoint, self.timeout)?))
    }
}

/// Model identifiers available at `endpoint`, sorted.
///
/// An empty endpoint yields an empty list without a network call.
pub async fn list_models(endpoint: &str, timeout: Duration) -> Result<Vec<String>> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return Ok(Vec::new());
    }

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Provider(e.to_string()))?;
    let response = client
        .get(format!("{}/api/tags", endpoint))
        .send()
        .await
        .map_err(|e| Error::Provider(format!("cannot reach {}: {}", endpoint, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Provider(format!(
            "model listing failed with {}",
            status
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Provider(e.to_string()))?;
    parse_tags(&json)
}

fn parse_tags(json: &serde_json::Value) -> Result<Vec<String>> {
    let models = json
        .get("models")
        .and_then(|m| m.as_array())
        .ok_or_else(|| Error::Provider("malformed model list: missing models".to_string()))?;

    let mut names: Vec<String> = models
        .iter()
        .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sorted() {
        let json = serde_json::json!({
            "models": [
                {"name": "mistral:latest", "size": 1},
                {"name": "llama3:8b"},
                {"model": "no-name"},
            ]
        });
        assert_eq!(parse_tags(&json).unwrap(), vec!["llama3:8b", "mistral:latest"]);
    }

    #[test]
    fn malformed_tags_are_provider_errors() {
        let err = parse_tags(&serde_json::json!({"error": "nope"})).unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn empty_endpoint_lists_nothing() {
        let models = list_models("  ", Duration::from_secs(1)).await.unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn connector_binds_model_and_endpoint() {
        let connector = OllamaConnector::new(Duration::from_secs(10));
        let llm = connector.connect("llama3", "http://gpu:11434/").unwrap();
        assert_eq!(llm.model(), "llama3");
        assert_eq!(llm.endpoint(), "http://gpu:11434");
        assert!(matches!(
            connector.connect("", "http://gpu:11434"),
            Err(Error::Config(_))
        ));
    }
}
