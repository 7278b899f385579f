//! Two-stage retrieval: vector similarity over an over-fetched pool, then optional reranking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coderag_llm::{AnyReranker, EmbeddingGateway, EmbeddingProvider, RerankCandidate, Reranker};

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};
use crate::store::{ScoredRecord, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    pub top_k: usize,
    /// Vector-stage pool is `top_k * over_fetch_factor` ...
    pub over_fetch_factor: usize,
    /// ... but never smaller than this.
    pub candidate_floor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            over_fetch_factor: 4,
            candidate_floor: 20,
        }
    }
}

/// Which stage produced the scores of a response. Scores from different stages are not
/// comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreStage {
    Vector,
    Rerank,
}

impl ScoreStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Rerank => "rerank",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerankStatus {
    Applied,
    Disabled,
    /// A reranker is configured but the vector stage left nothing to rerank.
    NoCandidates,
    /// Reranking was requested but failed; results are in vector order.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
    /// The chunk's vector was computed from head-truncated text.
    pub embedding_truncated: bool,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub query: String,
    /// Most relevant first.
    pub results: Vec<SearchResult>,
    pub stage: ScoreStage,
    pub rerank: RerankStatus,
    /// Wall-clock time for embedding, retrieval and reranking.
    pub elapsed: Duration,
}

impl SearchResponse {
    /// Reranking was wanted but could not be applied.
    #[must_use]
    pub fn degraded(&self) -> bool {
        matches!(self.rerank, RerankStatus::Skipped { .. })
    }
}

pub struct SearchOrchestrator<P, R = AnyReranker> {
    gateway: Arc<EmbeddingGateway<P>>,
    index: Arc<dyn VectorIndex>,
    reranker: Option<Arc<R>>,
    config: SearchConfig,
}

impl<P, R> std::fmt::Debug for SearchOrchestrator<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("reranking", &self.reranker.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: EmbeddingProvider, R: Reranker> SearchOrchestrator<P, R> {
    /// `reranker = None` disables the second stage.
    #[must_use]
    pub fn new(
        gateway: Arc<EmbeddingGateway<P>>,
        index: Arc<dyn VectorIndex>,
        reranker: Option<Arc<R>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            gateway,
            index,
            reranker,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Number of vector-stage candidates fetched for `top_k` results.
    #[must_use]
    pub fn candidate_pool(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.config.over_fetch_factor.max(1))
            .max(self.config.candidate_floor)
            .max(top_k)
    }

    /// Retrieve the `top_k` chunks most relevant to `query`.
    ///
    /// # Errors
    ///
    /// Fails if the query cannot be embedded or the index cannot be read. A reranking
    /// failure degrades to vector order instead, see [`SearchResponse::degraded`].
    pub async fn search(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        self.run(query, top_k, self.reranker.as_deref()).await
    }

    /// Vector-stage retrieval only, regardless of the configured reranker.
    ///
    /// # Errors
    ///
    /// Fails if the query cannot be embedded or the index cannot be read.
    pub async fn search_without_rerank(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        self.run(query, top_k, None).await
    }

    async fn run(&self, query: &str, top_k: usize, reranker: Option<&R>) -> Result<SearchResponse> {
        let start = Instant::now();
        let embedding = self.gateway.embed_one(query).await?;
        let pool = self.candidate_pool(top_k);
        let candidates = self.index.search_similar(embedding.vector, pool).await?;
        tracing::debug!(query, pool, fetched = candidates.len(), "vector stage done");

        let respond = |results: Vec<SearchResult>, stage: ScoreStage, rerank: RerankStatus| SearchResponse {
            query: query.to_owned(),
            results,
            stage,
            rerank,
            elapsed: start.elapsed(),
        };

        let Some(reranker) = reranker else {
            return Ok(respond(
                vector_results(candidates, top_k),
                ScoreStage::Vector,
                RerankStatus::Disabled,
            ));
        };
        if candidates.is_empty() || top_k == 0 {
            return Ok(respond(Vec::new(), ScoreStage::Vector, RerankStatus::NoCandidates));
        }

        let rerank_input: Vec<RerankCandidate> = candidates
            .iter()
            .map(|r| RerankCandidate {
                id: r.chunk.id.clone(),
                text: r.chunk.content.clone(),
            })
            .collect();

        let reason = match reranker.rerank(query, &rerank_input, Some(top_k)).await {
            Ok(scores) if !scores.is_empty() => {
                let mut by_id: HashMap<String, ScoredRecord> = candidates
                    .into_iter()
                    .map(|r| (r.chunk.id.clone(), r))
                    .collect();
                let results: Vec<SearchResult> = scores
                    .into_iter()
                    .filter_map(|s| {
                        by_id.remove(&s.id).map(|r| SearchResult {
                            chunk: r.chunk,
                            score: s.score,
                            embedding_truncated: r.embedding_truncated,
                        })
                    })
                    .take(top_k)
                    .collect();
                tracing::debug!(reranker = reranker.name(), kept = results.len(), "rerank stage done");
                return Ok(respond(results, ScoreStage::Rerank, RerankStatus::Applied));
            }
            Ok(_) => "reranker returned no scores".to_owned(),
            Err(e) => IndexError::RerankingUnavailable(e).to_string(),
        };

        tracing::warn!(reranker = reranker.name(), "reranking skipped, using vector order: {reason}");
        Ok(respond(
            vector_results(candidates, top_k),
            ScoreStage::Vector,
            RerankStatus::Skipped { reason },
        ))
    }
}

fn vector_results(candidates: Vec<ScoredRecord>, top_k: usize) -> Vec<SearchResult> {
    candidates
        .into_iter()
        .take(top_k)
        .map(|r| SearchResult {
            chunk: r.chunk,
            score: r.score,
            embedding_truncated: r.embedding_truncated,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use coderag_llm::GatewayConfig;
    use coderag_llm::mock::{MockEmbedder, MockReranker};

    use super::*;
    use crate::in_memory::InMemoryVectorIndex;
    use crate::store::test_support::record;

    async fn fixture(reranker: Option<MockReranker>) -> SearchOrchestrator<MockEmbedder, MockReranker> {
        let embedder = Arc::new(MockEmbedder::new(512));
        let index = Arc::new(InMemoryVectorIndex::new());
        let docs = [
            "parse the config file",
            "open a database connection",
            "parse command line arguments",
            "render the html page",
        ];
        let records = docs
            .iter()
            .enumerate()
            .map(|(i, text)| record("src/lib.rs", i + 1, text, embedder.vector_for(text)))
            .collect();
        index.upsert(records).await.unwrap();
        let gateway = Arc::new(EmbeddingGateway::new(embedder, GatewayConfig::default()));
        SearchOrchestrator::new(gateway, index, reranker.map(Arc::new), SearchConfig::default())
    }

    #[test]
    fn pool_honors_floor_and_factor() {
        let orchestrator = SearchOrchestrator::<MockEmbedder, MockReranker>::new(
            Arc::new(EmbeddingGateway::new(
                Arc::new(MockEmbedder::new(4)),
                GatewayConfig::default(),
            )),
            Arc::new(InMemoryVectorIndex::new()),
            None,
            SearchConfig::default(),
        );
        assert_eq!(orchestrator.candidate_pool(3), 20);
        assert_eq!(orchestrator.candidate_pool(10), 40);
    }

    #[tokio::test]
    async fn without_reranker_scores_are_vector_stage() {
        let orchestrator = fixture(None).await;
        let response = orchestrator.search("parse config", 2).await.unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.stage, ScoreStage::Vector);
        assert_eq!(response.rerank, RerankStatus::Disabled);
        assert!(!response.degraded());
        assert!(response.results[0].score >= response.results[1].score);
        assert_eq!(response.results[0].chunk.content, "parse the config file");
    }

    #[tokio::test]
    async fn reranker_reorders_and_truncates() {
        let orchestrator = fixture(Some(MockReranker::default())).await;
        let response = orchestrator
            .search("parse command line arguments", 1)
            .await
            .unwrap();
        assert_eq!(response.stage, ScoreStage::Rerank);
        assert_eq!(response.rerank, RerankStatus::Applied);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].chunk.content, "parse command line arguments");
    }

    #[tokio::test]
    async fn failing_reranker_degrades_to_vector_order() {
        let orchestrator = fixture(Some(MockReranker::failing())).await;
        let response = orchestrator.search("database connection", 3).await.unwrap();
        assert!(response.degraded());
        assert_eq!(response.stage, ScoreStage::Vector);
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[0].chunk.content, "open a database connection");
    }

    #[tokio::test]
    async fn search_without_rerank_bypasses_reranker() {
        let orchestrator = fixture(Some(MockReranker::failing())).await;
        let response = orchestrator
            .search_without_rerank("render html", 2)
            .await
            .unwrap();
        assert_eq!(response.rerank, RerankStatus::Disabled);
        assert!(!response.degraded());
    }

    #[tokio::test]
    async fn empty_index_returns_no_results() {
        let gateway = Arc::new(EmbeddingGateway::new(
            Arc::new(MockEmbedder::new(8)),
            GatewayConfig::default(),
        ));
        let orchestrator = SearchOrchestrator::new(
            gateway,
            Arc::new(InMemoryVectorIndex::new()),
            Some(Arc::new(MockReranker::default())),
            SearchConfig::default(),
        );
        let response = orchestrator.search("anything", 5).await.unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.rerank, RerankStatus::NoCandidates);
        assert!(!response.degraded());
    }

    #[tokio::test]
    async fn zero_top_k_with_reranker_reports_no_candidates() {
        let orchestrator = fixture(Some(MockReranker::default())).await;
        let response = orchestrator.search("parse config", 0).await.unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.rerank, RerankStatus::NoCandidates);
    }

    #[tokio::test]
    async fn skipped_reason_names_reranking_failure() {
        let orchestrator = fixture(Some(MockReranker::failing())).await;
        let response = orchestrator.search("render html", 2).await.unwrap();
        let RerankStatus::Skipped { reason } = response.rerank else {
            panic!("expected skipped rerank, got {:?}", response.rerank);
        };
        assert!(reason.starts_with("reranker failed:"), "{reason}");
    }

    #[tokio::test]
    async fn truncation_flag_survives_both_stages() {
        let embedder = Arc::new(MockEmbedder::new(64));
        let index = Arc::new(InMemoryVectorIndex::new());
        let mut long = record("src/a.rs", 1, "parse everything", embedder.vector_for("parse everything"));
        long.embedding_truncated = true;
        let short = record("src/b.rs", 1, "render html", embedder.vector_for("render html"));
        index.upsert(vec![long, short]).await.unwrap();
        let gateway = Arc::new(EmbeddingGateway::new(embedder, GatewayConfig::default()));
        let orchestrator = SearchOrchestrator::new(
            gateway,
            index,
            Some(Arc::new(MockReranker::default())),
            SearchConfig::default(),
        );

        for response in [
            orchestrator.search("parse everything", 2).await.unwrap(),
            orchestrator.search_without_rerank("parse everything", 2).await.unwrap(),
        ] {
            let flagged: Vec<_> = response
                .results
                .iter()
                .map(|r| (r.chunk.file_path.as_str(), r.embedding_truncated))
                .collect();
            assert!(flagged.contains(&("src/a.rs", true)), "{flagged:?}");
            assert!(flagged.contains(&("src/b.rs", false)), "{flagged:?}");
        }
    }

    #[tokio::test]
    async fn embedding_failure_fails_search() {
        let gateway = Arc::new(EmbeddingGateway::new(
            Arc::new(MockEmbedder::failing(8)),
            GatewayConfig::default(),
        ));
        let orchestrator = SearchOrchestrator::<MockEmbedder, MockReranker>::new(
            gateway,
            Arc::new(InMemoryVectorIndex::new()),
            None,
            SearchConfig::default(),
        );
        assert!(orchestrator.search("anything", 5).await.is_err());
    }
}
