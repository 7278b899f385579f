use std::future::Future;

use crate::error::LlmError;

/// A remote capability that turns texts into fixed-dimension vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// The returned vectors are in the same order as `inputs`; implementations must correlate
    /// response items to inputs by explicit index where the wire format provides one.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after retries or the response is malformed.
    fn embed_batch(
        &self,
        inputs: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send;

    fn name(&self) -> &'static str;
}

/// A query/candidate pair handed to a reranker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerankCandidate {
    pub id: String,
    pub text: String,
}

/// Relevance of one candidate, higher is more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankScore {
    pub id: String,
    pub score: f32,
}

/// Second-stage relevance scoring over a small candidate pool.
pub trait Reranker: Send + Sync {
    /// Score `candidates` against `query` and return them most relevant first.
    ///
    /// `top_k = None` returns every scored candidate, reordered.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy could not produce any score.
    fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: Option<usize>,
    ) -> impl Future<Output = Result<Vec<RerankScore>, LlmError>> + Send;

    fn name(&self) -> &'static str;
}

/// Sort scores descending; equal scores keep their incoming (vector-stage) order.
pub(crate) fn sort_and_truncate(scores: &mut Vec<RerankScore>, top_k: Option<usize>) {
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    if let Some(k) = top_k {
        scores.truncate(k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(id: &str, score: f32) -> RerankScore {
        RerankScore {
            id: id.into(),
            score,
        }
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut scores = vec![score("a", 0.1), score("b", 0.9), score("c", 0.1), score("d", 0.5)];
        sort_and_truncate(&mut scores, None);
        let ids: Vec<_> = scores.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["b", "d", "a", "c"]);
    }

    #[test]
    fn truncate_to_top_k() {
        let mut scores = vec![score("a", 0.1), score("b", 0.9), score("c", 0.3)];
        sort_and_truncate(&mut scores, Some(2));
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].id, "b");
    }
}
