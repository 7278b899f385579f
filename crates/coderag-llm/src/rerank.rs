//! Reranking strategies: a dedicated `/rerank` endpoint and yes/no judgment scoring.

use std::fmt;

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::normalize_base_url;
use crate::provider::{RerankCandidate, RerankScore, Reranker, sort_and_truncate};
use crate::retry::{RetryPolicy, send_with_retry};
use crate::tokens::truncate_to_tokens;

pub const DEFAULT_INSTRUCTION: &str =
    "Given a web search query, retrieve relevant passages that answer the query";

const JUDGE_SYSTEM_PROMPT: &str = "Judge whether the Document meets the requirements based on \
the Query and the Instruct provided. Note that the answer can only be \"yes\" or \"no\".";

/// Connection settings shared by both strategies.
#[derive(Clone)]
pub struct RerankEndpoint {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl fmt::Debug for RerankEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RerankEndpoint")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RerankEndpoint {
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

    async fn post_json<B: Serialize + Sync>(
        &self,
        provider: &'static str,
        path: &str,
        body: &B,
    ) -> Result<String, LlmError> {
        let url = format!("{}/{path}", self.base_url);
        let response = send_with_retry(provider, &self.retry, || {
            let request = self.client.post(&url);
            let request = match &self.api_key {
                Some(key) => request.bearer_auth(key),
                None => request,
            };
            request.json(body).send()
        })
        .await?;
        Ok(response.text().await?)
    }
}

/// Scores all candidates in one request to `POST {base_url}/rerank`.
#[derive(Debug, Clone)]
pub struct DirectReranker {
    endpoint: RerankEndpoint,
    instruction: Option<String>,
    max_input_tokens: usize,
}

impl DirectReranker {
    #[must_use]
    pub fn new(endpoint: RerankEndpoint) -> Self {
        Self {
            endpoint,
            instruction: None,
            max_input_tokens: 8192,
        }
    }

    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    #[must_use]
    pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }
}

impl Reranker for DirectReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankScore>, LlmError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<&str> = candidates
            .iter()
            .map(|c| truncate_to_tokens(&c.text, self.max_input_tokens).0)
            .collect();
        let body = DirectRerankRequest {
            model: &self.endpoint.model,
            query,
            documents: &documents,
            instruction: self.instruction.as_deref(),
            top_k,
            return_documents: false,
        };

        let text = self.endpoint.post_json("rerank", "rerank", &body).await?;
        let resp: DirectRerankResponse = serde_json::from_str(&text)?;

        let mut scores = Vec::with_capacity(resp.results.len());
        for result in resp.results {
            match candidates.get(result.index) {
                Some(c) => scores.push(RerankScore {
                    id: c.id.clone(),
                    score: result.relevance_score,
                }),
                None => tracing::warn!(index = result.index, "rerank result index out of range"),
            }
        }
        if scores.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "rerank" });
        }
        sort_and_truncate(&mut scores, top_k);
        Ok(scores)
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

#[derive(Serialize)]
struct DirectRerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
    return_documents: bool,
}

#[derive(Deserialize)]
struct DirectRerankResponse {
    results: Vec<DirectRerankResult>,
}

#[derive(Deserialize)]
struct DirectRerankResult {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}

/// Scores each candidate with a one-token yes/no chat completion and uses P("yes").
///
/// Issues one request per candidate, so the pool is capped at `max_candidates`
/// (raised to `top_k` when that is larger) before any request is made.
#[derive(Debug, Clone)]
pub struct JudgmentReranker {
    endpoint: RerankEndpoint,
    instruction: String,
    max_candidates: usize,
    parallelism: usize,
    max_input_tokens: usize,
}

impl JudgmentReranker {
    #[must_use]
    pub fn new(endpoint: RerankEndpoint) -> Self {
        Self {
            endpoint,
            instruction: DEFAULT_INSTRUCTION.to_owned(),
            max_candidates: 20,
            parallelism: 4,
            max_input_tokens: 8192,
        }
    }

    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    #[must_use]
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    #[must_use]
    pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }

    async fn judge(&self, query: &str, document: &str) -> Result<f32, LlmError> {
        let document = truncate_to_tokens(document, self.max_input_tokens).0;
        let user = format!(
            "<Instruct>: {}\n\n<Query>: {query}\n\n<Document>: {document}",
            self.instruction
        );
        let body = JudgmentRequest {
            model: &self.endpoint.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: JUDGE_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            max_tokens: 1,
            temperature: 0.0,
            logprobs: true,
            top_logprobs: 5,
        };

        let text = self
            .endpoint
            .post_json("judgment", "chat/completions", &body)
            .await?;
        let resp: JudgmentResponse = serde_json::from_str(&text)?;
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse {
                provider: "judgment",
            })?;
        Ok(yes_probability(&choice))
    }
}

impl Reranker for JudgmentReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankScore>, LlmError> {
        let cap = self.max_candidates.max(top_k.unwrap_or(0));
        let pool = &candidates[..candidates.len().min(cap)];
        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let judgments: Vec<_> = pool
            .iter()
            .enumerate()
            .map(|(i, c)| async move { (i, self.judge(query, &c.text).await) })
            .collect();
        let mut judged: Vec<(usize, Result<f32, LlmError>)> = stream::iter(judgments)
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        judged.sort_by_key(|(i, _)| *i);

        let mut failures = 0usize;
        let mut last_error = None;
        let mut scores = Vec::with_capacity(pool.len());
        for (i, result) in judged {
            let score = match result {
                Ok(score) => score,
                Err(e) => {
                    tracing::warn!(candidate = %pool[i].id, "judgment request failed: {e}");
                    failures += 1;
                    last_error = Some(e);
                    0.0
                }
            };
            scores.push(RerankScore {
                id: pool[i].id.clone(),
                score,
            });
        }

        if failures == pool.len() {
            let reason = last_error.map_or_else(|| "no judgments".to_owned(), |e| e.to_string());
            return Err(LlmError::RerankingUnavailable(reason));
        }

        sort_and_truncate(&mut scores, top_k);
        Ok(scores)
    }

    fn name(&self) -> &'static str {
        "judgment"
    }
}

/// Probability mass of "yes" among the first token's top log-probabilities.
///
/// Without log-probabilities the generated answer decides: "yes" scores 1.0, anything else 0.0.
fn yes_probability(choice: &JudgmentChoice) -> f32 {
    let first = choice
        .logprobs
        .as_ref()
        .and_then(|lp| lp.content.as_ref())
        .and_then(|tokens| tokens.first());

    if let Some(first) = first {
        let mass: f64 = if first.top_logprobs.is_empty() {
            if is_yes(&first.token) {
                first.logprob.exp()
            } else {
                0.0
            }
        } else {
            first
                .top_logprobs
                .iter()
                .filter(|t| is_yes(&t.token))
                .map(|t| t.logprob.exp())
                .sum()
        };
        #[allow(clippy::cast_possible_truncation)]
        return mass.clamp(0.0, 1.0) as f32;
    }

    let answer = choice
        .message
        .as_ref()
        .and_then(|m| m.content.as_deref())
        .unwrap_or_default();
    if is_yes(answer) { 1.0 } else { 0.0 }
}

fn is_yes(token: &str) -> bool {
    token.trim().eq_ignore_ascii_case("yes")
}

#[derive(Serialize)]
struct JudgmentRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    logprobs: bool,
    top_logprobs: u8,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct JudgmentResponse {
    choices: Vec<JudgmentChoice>,
}

#[derive(Deserialize)]
struct JudgmentChoice {
    #[serde(default)]
    message: Option<JudgmentMessage>,
    #[serde(default)]
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Deserialize)]
struct JudgmentMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Option<Vec<TokenLogprob>>,
}

#[derive(Deserialize)]
struct TokenLogprob {
    token: String,
    logprob: f64,
    #[serde(default)]
    top_logprobs: Vec<TopLogprob>,
}

#[derive(Deserialize)]
struct TopLogprob {
    token: String,
    logprob: f64,
}
