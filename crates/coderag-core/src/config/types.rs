use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranking: RerankingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    /// Bearer token for the model server; read from `CODERAG_API_KEY`, never from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:1234/v1".into()
}

fn default_embedding_model() -> String {
    "text-embedding-qwen3-embedding-4b".into()
}

fn default_reranking_model() -> String {
    "qwen.qwen3-reranker-4b".into()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_reranking_model")]
    pub reranking_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            reranking_model: default_reranking_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}

fn default_parallelism() -> usize {
    4
}

fn default_max_input_tokens() -> usize {
    8192
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallelism: default_parallelism(),
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

/// Reranking strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankStrategy {
    /// One `/rerank` request scoring every candidate.
    #[default]
    Direct,
    /// One yes/no chat completion per candidate, scored by token probability.
    Judgment,
}

impl RerankStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Judgment => "judgment",
        }
    }
}

impl std::fmt::Display for RerankStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RerankStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "judgment" => Ok(Self::Judgment),
            other => Err(format!("unknown rerank strategy: {other}")),
        }
    }
}

fn default_max_candidates() -> usize {
    20
}

fn default_instruction() -> String {
    coderag_llm::rerank::DEFAULT_INSTRUCTION.into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RerankingConfig {
    #[serde(default)]
    pub strategy: RerankStrategy,
    /// Candidates scored by the judgment strategy per query.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_instruction")]
    pub instruction: String,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            strategy: RerankStrategy::default(),
            max_candidates: default_max_candidates(),
            parallelism: default_parallelism(),
            instruction: default_instruction(),
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

fn default_db_path() -> String {
    ".coderag/index.db".into()
}

fn default_max_chunk_tokens() -> usize {
    500
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_ignore_filename() -> String {
    ".coderagignore".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IndexConfig {
    /// `SQLite` database file, relative to the working directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_parallelism")]
    pub file_parallelism: usize,
    #[serde(default = "default_ignore_filename")]
    pub ignore_filename: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_chunk_tokens: default_max_chunk_tokens(),
            max_file_size: default_max_file_size(),
            file_parallelism: default_parallelism(),
            ignore_filename: default_ignore_filename(),
        }
    }
}

fn default_use_reranking() -> bool {
    true
}

fn default_top_k() -> usize {
    5
}

fn default_over_fetch_factor() -> usize {
    4
}

fn default_candidate_floor() -> usize {
    20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_use_reranking")]
    pub use_reranking: bool,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,
    #[serde(default = "default_candidate_floor")]
    pub candidate_floor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            use_reranking: default_use_reranking(),
            top_k: default_top_k(),
            over_fetch_factor: default_over_fetch_factor(),
            candidate_floor: default_candidate_floor(),
        }
    }
}
