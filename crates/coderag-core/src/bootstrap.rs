//! Pipeline bootstrap: config resolution, provider, index and orchestrator construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coderag_index::{
    IndexError, IndexerConfig, RepositoryIndexer, SearchOrchestrator, SqliteVectorIndex,
    VectorIndex,
};
use coderag_llm::http::default_client;
use coderag_llm::{
    AnyEmbedder, AnyReranker, DirectReranker, EmbeddingGateway, EmbeddingProvider, GatewayConfig,
    HealthStatus, JudgmentReranker, OpenAiEmbedder, RerankEndpoint, RetryPolicy,
};

use crate::config::{
    Config, ConfigError, DEFAULT_CONFIG_PATH, EmbeddingConfig, IndexConfig, RerankStrategy,
};

pub type Indexer = RepositoryIndexer<AnyEmbedder>;
pub type Orchestrator = SearchOrchestrator<AnyEmbedder, AnyReranker>;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open index: {0}")]
    Index(#[from] IndexError),
}

/// Config path from the command line, then `CODERAG_CONFIG`, then [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("CODERAG_CONFIG")
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy::default().with_max_retries(config.api.max_retries)
}

#[must_use]
pub fn build_embedder(config: &Config) -> AnyEmbedder {
    AnyEmbedder::OpenAi(
        OpenAiEmbedder::new(
            config.api.base_url.clone(),
            config.api_key.clone(),
            config.api.embedding_model.clone(),
        )
        .with_client(default_client(Duration::from_secs(config.api.timeout_secs)))
        .with_retry(retry_policy(config)),
    )
}

/// Configured reranking strategy, or `None` when `search.use_reranking` is off.
#[must_use]
pub fn build_reranker(config: &Config) -> Option<AnyReranker> {
    if !config.search.use_reranking {
        return None;
    }
    let endpoint = RerankEndpoint::new(
        config.api.base_url.clone(),
        config.api_key.clone(),
        config.api.reranking_model.clone(),
    )
    .with_client(default_client(Duration::from_secs(config.api.timeout_secs)))
    .with_retry(retry_policy(config));

    let rerank = &config.reranking;
    Some(match rerank.strategy {
        RerankStrategy::Direct => AnyReranker::Direct(
            DirectReranker::new(endpoint)
                .with_instruction(rerank.instruction.clone())
                .with_max_input_tokens(rerank.max_input_tokens),
        ),
        RerankStrategy::Judgment => AnyReranker::Judgment(
            JudgmentReranker::new(endpoint)
                .with_instruction(rerank.instruction.clone())
                .with_max_candidates(rerank.max_candidates)
                .with_parallelism(rerank.parallelism)
                .with_max_input_tokens(rerank.max_input_tokens),
        ),
    })
}

#[must_use]
pub fn gateway_config(embedding: &EmbeddingConfig) -> GatewayConfig {
    GatewayConfig {
        batch_size: embedding.batch_size,
        parallelism: embedding.parallelism,
        max_input_tokens: embedding.max_input_tokens,
    }
}

#[must_use]
pub fn indexer_config(index: &IndexConfig) -> IndexerConfig {
    IndexerConfig {
        max_chunk_tokens: index.max_chunk_tokens,
        max_file_size: index.max_file_size,
        file_parallelism: index.file_parallelism,
        ignore_filename: index.ignore_filename.clone(),
    }
}

#[must_use]
pub fn search_config(config: &Config) -> coderag_index::SearchConfig {
    coderag_index::SearchConfig {
        top_k: config.search.top_k,
        over_fetch_factor: config.search.over_fetch_factor,
        candidate_floor: config.search.candidate_floor,
    }
}

/// Every component needed to index and search, built from one validated [`Config`].
pub struct Pipeline {
    config: Config,
    embedder: Arc<AnyEmbedder>,
    index: Arc<dyn VectorIndex>,
    indexer: Arc<Indexer>,
    search: Orchestrator,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("db_path", &self.config.index.db_path)
            .field("embedder", &self.embedder.name())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `config`, open the `SQLite` index and wire the HTTP-backed capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] for invalid settings and
    /// [`BootstrapError::Index`] if the database cannot be opened or migrated.
    pub async fn build(config: Config) -> Result<Self, BootstrapError> {
        config.validate()?;
        let index = SqliteVectorIndex::open(&config.index.db_path).await?;
        index.initialize().await?;
        tracing::debug!(db_path = %config.index.db_path, "index opened");

        let embedder = build_embedder(&config);
        let reranker = build_reranker(&config);
        Ok(Self::from_parts(config, embedder, reranker, Arc::new(index)))
    }

    /// Assemble a pipeline around already constructed capabilities.
    #[must_use]
    pub fn from_parts(
        config: Config,
        embedder: AnyEmbedder,
        reranker: Option<AnyReranker>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let embedder = Arc::new(embedder);
        let gateway = Arc::new(EmbeddingGateway::new(
            Arc::clone(&embedder),
            gateway_config(&config.embedding),
        ));
        let indexer = Arc::new(RepositoryIndexer::new(
            Arc::clone(&index),
            Arc::clone(&gateway),
            indexer_config(&config.index),
        ));
        let search = SearchOrchestrator::new(
            gateway,
            Arc::clone(&index),
            reranker.map(Arc::new),
            search_config(&config),
        );
        Self {
            config,
            embedder,
            index,
            indexer,
            search,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    #[must_use]
    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    #[must_use]
    pub fn search(&self) -> &Orchestrator {
        &self.search
    }

    /// Reachability of the embedding model server.
    pub async fn health(&self) -> HealthStatus {
        self.embedder.health().await
    }
}

#[cfg(test)]
mod tests {
    use coderag_index::InMemoryVectorIndex;
    use coderag_llm::mock::{MockEmbedder, MockReranker};
    use serial_test::serial;
    use tokio::sync::watch;

    use super::*;

    #[test]
    #[serial]
    fn config_path_precedence() {
        unsafe { std::env::remove_var("CODERAG_CONFIG") };
        assert_eq!(resolve_config_path(None), PathBuf::from("coderag.toml"));

        unsafe { std::env::set_var("CODERAG_CONFIG", "/etc/coderag.toml") };
        assert_eq!(resolve_config_path(None), PathBuf::from("/etc/coderag.toml"));
        assert_eq!(
            resolve_config_path(Some(Path::new("local.toml"))),
            PathBuf::from("local.toml")
        );
        unsafe { std::env::remove_var("CODERAG_CONFIG") };
    }

    #[test]
    fn reranker_follows_strategy() {
        let mut config = Config::default();
        assert!(matches!(build_reranker(&config), Some(AnyReranker::Direct(_))));

        config.reranking.strategy = RerankStrategy::Judgment;
        assert!(matches!(build_reranker(&config), Some(AnyReranker::Judgment(_))));

        config.search.use_reranking = false;
        assert!(build_reranker(&config).is_none());
    }

    #[test]
    fn component_configs_mirror_settings() {
        let mut config = Config::default();
        config.embedding.batch_size = 7;
        config.index.max_chunk_tokens = 123;
        config.search.candidate_floor = 11;

        assert_eq!(gateway_config(&config.embedding).batch_size, 7);
        assert_eq!(indexer_config(&config.index).max_chunk_tokens, 123);
        assert_eq!(search_config(&config).candidate_floor, 11);
        assert_eq!(build_embedder(&config).name(), "openai");
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let mut config = Config::default();
        config.search.top_k = 0;
        assert!(matches!(
            Pipeline::build(config).await,
            Err(BootstrapError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn build_opens_sqlite_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.index.db_path = dir
            .path()
            .join("nested/index.db")
            .to_string_lossy()
            .into_owned();
        let pipeline = Pipeline::build(config).await.unwrap();
        assert_eq!(pipeline.index().stats().await.unwrap().chunks, 0);
        assert!(dir.path().join("nested/index.db").exists());
    }

    #[tokio::test]
    async fn mock_pipeline_indexes_and_searches() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(
            repo.path().join("lib.rs"),
            "fn connect_database() {\n    let pool = open();\n}\n",
        )
        .unwrap();

        let pipeline = Pipeline::from_parts(
            Config::default(),
            AnyEmbedder::Mock(MockEmbedder::new(64)),
            Some(AnyReranker::Mock(MockReranker::default())),
            Arc::new(InMemoryVectorIndex::new()),
        );
        let (_tx, rx) = watch::channel(false);
        let summary = pipeline
            .indexer()
            .index_repository(repo.path(), &rx)
            .await
            .unwrap();
        assert_eq!(summary.files_indexed, 1);

        let response = pipeline.search().search("connect database", 5).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.rerank, coderag_index::RerankStatus::Applied);
        assert!(pipeline.health().await.reachable);
    }
}
