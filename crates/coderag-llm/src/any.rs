#[cfg(feature = "mock")]
use crate::mock::{MockEmbedder, MockReranker};
use crate::error::LlmError;
use crate::openai::{HealthStatus, OpenAiEmbedder};
use crate::provider::{EmbeddingProvider, RerankCandidate, RerankScore, Reranker};
use crate::rerank::{DirectReranker, JudgmentReranker};

/// Generates a match over all `AnyReranker` variants, binding the inner strategy
/// and evaluating the given expression for each arm.
macro_rules! delegate_reranker {
    ($self:expr, |$r:ident| $expr:expr) => {
        match $self {
            AnyReranker::Direct($r) => $expr,
            AnyReranker::Judgment($r) => $expr,
            #[cfg(feature = "mock")]
            AnyReranker::Mock($r) => $expr,
        }
    };
}

/// Reranking strategy selected from configuration.
#[derive(Debug, Clone)]
pub enum AnyReranker {
    Direct(DirectReranker),
    Judgment(JudgmentReranker),
    #[cfg(feature = "mock")]
    Mock(MockReranker),
}

impl Reranker for AnyReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankScore>, LlmError> {
        delegate_reranker!(self, |r| r.rerank(query, candidates, top_k).await)
    }

    fn name(&self) -> &'static str {
        delegate_reranker!(self, |r| r.name())
    }
}

#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    OpenAi(OpenAiEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl EmbeddingProvider for AnyEmbedder {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        match self {
            Self::OpenAi(p) => p.embed_batch(inputs).await,
            #[cfg(feature = "mock")]
            Self::Mock(p) => p.embed_batch(inputs).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::OpenAi(p) => p.name(),
            #[cfg(feature = "mock")]
            Self::Mock(p) => p.name(),
        }
    }
}

impl AnyEmbedder {
    /// Reachability of the backing model server; in-process providers are always reachable.
    pub async fn health(&self) -> HealthStatus {
        match self {
            Self::OpenAi(p) => p.health().await,
            #[cfg(feature = "mock")]
            Self::Mock(_) => HealthStatus {
                reachable: true,
                endpoint: "mock".into(),
                detail: "in-process".into(),
            },
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delegates_to_inner_reranker() {
        let reranker = AnyReranker::Mock(MockReranker::default());
        assert_eq!(reranker.name(), "mock");
        let candidates = vec![
            RerankCandidate {
                id: "a".into(),
                text: "unrelated words".into(),
            },
            RerankCandidate {
                id: "b".into(),
                text: "parse config file".into(),
            },
        ];
        let scores = reranker
            .rerank("parse config", &candidates, None)
            .await
            .unwrap();
        assert_eq!(scores[0].id, "b");
    }

    #[tokio::test]
    async fn delegates_to_inner_embedder() {
        let embedder = AnyEmbedder::Mock(MockEmbedder::new(16));
        let vectors = embedder.embed_batch(&["hello".into()]).await.unwrap();
        assert_eq!(vectors[0].len(), 16);
    }
}
