//! Batched, bounded-concurrency access to an [`EmbeddingProvider`].

use std::sync::Arc;

use futures::{StreamExt, stream};

use crate::error::{LlmError, Result};
use crate::provider::EmbeddingProvider;
use crate::tokens::truncate_to_tokens;

/// Embedding gateway limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Maximum texts per provider request.
    pub batch_size: usize,
    /// Maximum provider requests in flight.
    pub parallelism: usize,
    /// Texts longer than this many estimated tokens are head-truncated.
    pub max_input_tokens: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            parallelism: 4,
            max_input_tokens: 8192,
        }
    }
}

/// One embedded text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    /// The input was cut to `max_input_tokens` before embedding.
    pub truncated: bool,
}

pub struct EmbeddingGateway<P> {
    provider: Arc<P>,
    config: GatewayConfig,
}

impl<P> std::fmt::Debug for EmbeddingGateway<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: EmbeddingProvider> EmbeddingGateway<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: GatewayConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Embed `texts`, returning one [`Embedding`] per input in input order.
    ///
    /// Inputs are split into batches of `batch_size`, and up to `parallelism` batches are sent
    /// concurrently. Each batch is tagged with its position so responses completing out of
    /// order are reassembled correctly.
    ///
    /// # Errors
    ///
    /// Returns the first batch failure (after the provider's own retries), or
    /// [`LlmError::DimensionMismatch`] if the provider returns vectors of differing lengths.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut truncated = Vec::with_capacity(texts.len());
        let inputs: Vec<String> = texts
            .iter()
            .map(|text| {
                let (head, cut) = truncate_to_tokens(text, self.config.max_input_tokens);
                if cut {
                    tracing::debug!(
                        chars = text.chars().count(),
                        max_tokens = self.config.max_input_tokens,
                        "embedding input truncated"
                    );
                }
                truncated.push(cut);
                head.to_owned()
            })
            .collect();

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<String>> = inputs.chunks(batch_size).map(<[String]>::to_vec).collect();
        let batch_sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        let batch_count = batches.len();

        let mut completed: Vec<(usize, Result<Vec<Vec<f32>>>)> =
            stream::iter(batches.into_iter().enumerate())
                .map(|(batch_id, batch)| {
                    let provider = Arc::clone(&self.provider);
                    async move { (batch_id, provider.embed_batch(&batch).await) }
                })
                .buffer_unordered(self.config.parallelism.max(1))
                .collect()
                .await;

        completed.sort_by_key(|(batch_id, _)| *batch_id);

        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_id, result) in completed {
            let batch_vectors = result?;
            let expected = batch_sizes[batch_id];
            if batch_vectors.len() != expected {
                return Err(LlmError::Other(format!(
                    "batch {batch_id}/{batch_count} returned {} vectors for {expected} inputs",
                    batch_vectors.len()
                )));
            }
            vectors.extend(batch_vectors);
        }

        let dimension = vectors.first().map_or(0, Vec::len);
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(LlmError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        Ok(vectors
            .into_iter()
            .zip(truncated)
            .map(|(vector, truncated)| Embedding { vector, truncated })
            .collect())
    }

    /// Embed a single query text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or returns no vector.
    pub async fn embed_one(&self, text: &str) -> Result<Embedding> {
        self.embed(&[text.to_owned()])
            .await?
            .pop()
            .ok_or(LlmError::EmptyResponse {
                provider: self.provider.name(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Returns `[first_char_code, len]` per input; later batches answer faster so completions
    /// arrive out of order.
    struct SlowFirstProvider {
        batches_seen: Mutex<Vec<usize>>,
    }

    impl EmbeddingProvider for SlowFirstProvider {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            let first = inputs[0].clone();
            let delay = if first.starts_with('a') { 30 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.batches_seen.lock().unwrap().push(inputs.len());
            #[allow(clippy::cast_precision_loss)]
            Ok(inputs
                .iter()
                .map(|s| vec![f32::from(s.as_bytes()[0]), s.len() as f32])
                .collect())
        }

        fn name(&self) -> &'static str {
            "slow-first"
        }
    }

    struct RaggedProvider;

    impl EmbeddingProvider for RaggedProvider {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs.iter().map(|s| vec![0.0; s.len()]).collect())
        }

        fn name(&self) -> &'static str {
            "ragged"
        }
    }

    struct FailingProvider;

    impl EmbeddingProvider for FailingProvider {
        async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(LlmError::Timeout)
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn gateway<P: EmbeddingProvider>(provider: P, batch_size: usize) -> EmbeddingGateway<P> {
        EmbeddingGateway::new(
            Arc::new(provider),
            GatewayConfig {
                batch_size,
                parallelism: 4,
                max_input_tokens: 2,
            },
        )
    }

    #[tokio::test]
    async fn reassembles_out_of_order_batches() {
        let gw = gateway(
            SlowFirstProvider {
                batches_seen: Mutex::new(Vec::new()),
            },
            2,
        );
        let texts: Vec<String> = ["a1", "a2", "b1", "c1", "d1"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let out = gw.embed(&texts).await.unwrap();
        let firsts: Vec<u8> = out.iter().map(|e| e.vector[0] as u8).collect();
        assert_eq!(firsts, b"aabcd");
        assert_eq!(gw.provider().batches_seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn long_inputs_are_head_truncated_and_flagged() {
        let gw = gateway(
            SlowFirstProvider {
                batches_seen: Mutex::new(Vec::new()),
            },
            8,
        );
        let out = gw
            .embed(&["b-short".into(), "bbbbbbbbbbbbbbbbbbbb".into()])
            .await
            .unwrap();
        assert!(!out[0].truncated);
        assert!(out[1].truncated);
        assert!((out[1].vector[1] - 8.0).abs() < f32::EPSILON);

        let out = gw.embed(&["bcd".into()]).await.unwrap();
        assert!(!out[0].truncated);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let gw = gateway(RaggedProvider, 8);
        let err = gw.embed(&["a".into(), "abc".into()]).await.unwrap_err();
        assert!(matches!(err, LlmError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn batch_failure_is_surfaced() {
        let gw = gateway(FailingProvider, 8);
        let err = gw.embed_one("query").await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let gw = gateway(FailingProvider, 8);
        assert!(gw.embed(&[]).await.unwrap().is_empty());
    }
}
