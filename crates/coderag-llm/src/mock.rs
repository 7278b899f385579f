//! Deterministic in-process providers for tests.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, RerankCandidate, RerankScore, Reranker, sort_and_truncate};

/// Bag-of-words hashing embedder: texts sharing words get similar vectors.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    calls: Arc<AtomicUsize>,
    texts: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: Arc::new(AtomicUsize::new(0)),
            texts: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn failing(dimension: usize) -> Self {
        let mock = Self::new(dimension);
        mock.set_failing(true);
        mock
    }

    /// Toggle failure mode; shared by all clones.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of `embed_batch` calls so far, across clones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts embedded so far, across clones.
    #[must_use]
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in words(text) {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            #[allow(clippy::cast_possible_truncation)]
            let slot = (hasher.finish() % self.dimension as u64) as usize;
            v[slot] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LlmError::Other("mock embedding failure".into()));
        }
        self.texts.fetch_add(inputs.len(), Ordering::SeqCst);
        Ok(inputs.iter().map(|t| self.vector_for(t)).collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Scores candidates by the fraction of query words they contain.
#[derive(Debug, Clone, Default)]
pub struct MockReranker {
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl MockReranker {
    #[must_use]
    pub fn failing() -> Self {
        let mock = Self::default();
        mock.fail.store(true, Ordering::SeqCst);
        mock
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reranker for MockReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankScore>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LlmError::RerankingUnavailable("mock reranker down".into()));
        }
        let query_words: HashSet<String> = words(query).collect();
        let mut scores: Vec<RerankScore> = candidates
            .iter()
            .map(|c| {
                let doc: HashSet<String> = words(&c.text).collect();
                let hits = query_words.intersection(&doc).count();
                #[allow(clippy::cast_precision_loss)]
                let score = if query_words.is_empty() {
                    0.0
                } else {
                    hits as f32 / query_words.len() as f32
                };
                RerankScore {
                    id: c.id.clone(),
                    score,
                }
            })
            .collect();
        sort_and_truncate(&mut scores, top_k);
        Ok(scores)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}
