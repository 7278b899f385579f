//! Embedding and reranking over OpenAI-compatible model servers.

pub mod any;
pub mod error;
pub mod gateway;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod rerank;
pub mod retry;
pub mod tokens;

pub use any::{AnyEmbedder, AnyReranker};
pub use error::LlmError;
pub use gateway::{Embedding, EmbeddingGateway, GatewayConfig};
pub use openai::{HealthStatus, OpenAiEmbedder};
pub use provider::{EmbeddingProvider, RerankCandidate, RerankScore, Reranker};
pub use rerank::{DirectReranker, JudgmentReranker, RerankEndpoint};
pub use retry::RetryPolicy;
