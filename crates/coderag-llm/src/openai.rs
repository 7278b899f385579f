use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::normalize_base_url;
use crate::provider::EmbeddingProvider;
use crate::retry::{RetryPolicy, send_with_retry};

/// Embedding client for OpenAI-compatible servers (`POST {base_url}/embeddings`).
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Reachability of the model server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub reachable: bool,
    pub endpoint: String,
    pub detail: String,
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: crate::http::default_client(std::time::Duration::from_secs(300)),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: normalize_base_url(base_url),
            model,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Probe `GET {base_url}/health`, falling back to `GET {base_url}/models`.
    ///
    /// Never fails: an unreachable server is reported through [`HealthStatus::reachable`].
    pub async fn health(&self) -> HealthStatus {
        let mut detail = String::new();
        for path in ["health", "models"] {
            let endpoint = format!("{}/{path}", self.base_url);
            match self.authorized(self.client.get(&endpoint)).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return HealthStatus {
                        reachable: true,
                        endpoint,
                        detail: resp.status().to_string(),
                    };
                }
                Ok(resp) => detail = format!("{endpoint}: {}", resp.status()),
                Err(e) => detail = format!("{endpoint}: {e}"),
            }
        }
        HealthStatus {
            reachable: false,
            endpoint: self.base_url.clone(),
            detail,
        }
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            encoding_format: "float",
        };
        let url = format!("{}/embeddings", self.base_url);

        let response = send_with_retry("embeddings", &self.retry, || {
            self.authorized(self.client.post(&url)).json(&body).send()
        })
        .await?;

        let text = response.text().await?;
        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        place_by_index(resp.data, inputs.len())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Order response items by their `index` field; positional order only when no item has one.
fn place_by_index(data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>, LlmError> {
    if data.len() != expected {
        return Err(LlmError::Other(format!(
            "embedding response has {} items for {expected} inputs",
            data.len()
        )));
    }
    if data.iter().all(|d| d.index.is_none()) {
        return Ok(data.into_iter().map(|d| d.embedding).collect());
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in data {
        let idx = item
            .index
            .ok_or_else(|| LlmError::Other("embedding item without index".into()))?;
        let slot = slots
            .get_mut(idx)
            .ok_or_else(|| LlmError::Other(format!("embedding index {idx} out of range")))?;
        if slot.replace(item.embedding).is_some() {
            return Err(LlmError::Other(format!("duplicate embedding index {idx}")));
        }
    }
    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(LlmError::EmptyResponse {
            provider: "openai",
        })
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}
