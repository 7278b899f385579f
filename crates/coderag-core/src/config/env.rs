use std::str::FromStr;

use super::{Config, RerankStrategy};

/// Parse `CODERAG_*` variable `key`, warning and returning `None` when it does not parse.
fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(parsed) = v.trim().parse::<T>() {
        Some(parsed)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_api();
        self.apply_env_overrides_pipeline();
    }

    fn apply_env_overrides_api(&mut self) {
        if let Ok(v) = std::env::var("CODERAG_API_BASE") {
            self.api.base_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_API_KEY")
            && !v.is_empty()
        {
            self.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_EMBEDDING_MODEL") {
            self.api.embedding_model = v;
        }
        if let Ok(v) = std::env::var("CODERAG_RERANKING_MODEL") {
            self.api.reranking_model = v;
        }
        if let Some(secs) = parsed::<u64>("CODERAG_TIMEOUT_SECS") {
            self.api.timeout_secs = secs;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Some(strategy) = parsed::<RerankStrategy>("CODERAG_RERANK_STRATEGY") {
            self.reranking.strategy = strategy;
        }
        if let Ok(v) = std::env::var("CODERAG_DB_PATH") {
            self.index.db_path = v;
        }
        if let Some(tokens) = parsed::<usize>("CODERAG_MAX_CHUNK_TOKENS") {
            self.index.max_chunk_tokens = tokens;
        }
        if let Some(enabled) = parsed::<bool>("CODERAG_USE_RERANKING") {
            self.search.use_reranking = enabled;
        }
        if let Some(k) = parsed::<usize>("CODERAG_TOP_K") {
            self.search.top_k = k;
        }
        if let Some(factor) = parsed::<usize>("CODERAG_OVER_FETCH_FACTOR") {
            self.search.over_fetch_factor = factor;
        }
        if let Some(floor) = parsed::<usize>("CODERAG_CANDIDATE_FLOOR") {
            self.search.candidate_floor = floor;
        }
        if let Some(size) = parsed::<usize>("CODERAG_EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = size;
        }
        if let Some(n) = parsed::<usize>("CODERAG_EMBEDDING_PARALLELISM") {
            self.embedding.parallelism = n;
        }
    }
}
