use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 15] = [
    "CODERAG_API_BASE",
    "CODERAG_API_KEY",
    "CODERAG_EMBEDDING_MODEL",
    "CODERAG_RERANKING_MODEL",
    "CODERAG_RERANK_STRATEGY",
    "CODERAG_DB_PATH",
    "CODERAG_MAX_CHUNK_TOKENS",
    "CODERAG_USE_RERANKING",
    "CODERAG_TOP_K",
    "CODERAG_OVER_FETCH_FACTOR",
    "CODERAG_CANDIDATE_FLOOR",
    "CODERAG_EMBEDDING_BATCH_SIZE",
    "CODERAG_EMBEDDING_PARALLELISM",
    "CODERAG_TIMEOUT_SECS",
    "CODERAG_CONFIG",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("coderag.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    path
}

#[test]
fn defaults() {
    let config = Config::default();
    assert_eq!(config.api.base_url, "http://localhost:1234/v1");
    assert_eq!(config.api.embedding_model, "text-embedding-qwen3-embedding-4b");
    assert_eq!(config.api.reranking_model, "qwen.qwen3-reranker-4b");
    assert_eq!(config.api.timeout_secs, 300);
    assert_eq!(config.embedding.batch_size, 32);
    assert_eq!(config.reranking.strategy, RerankStrategy::Direct);
    assert_eq!(config.reranking.max_candidates, 20);
    assert_eq!(config.index.db_path, ".coderag/index.db");
    assert_eq!(config.index.max_chunk_tokens, 500);
    assert_eq!(config.index.max_file_size, 1024 * 1024);
    assert!(config.search.use_reranking);
    assert_eq!(config.search.top_k, 5);
    assert_eq!(config.search.over_fetch_factor, 4);
    assert_eq!(config.search.candidate_floor, 20);
    assert!(config.api_key.is_none());
    config.validate().unwrap();
}

#[test]
#[serial]
fn missing_file_gives_defaults() {
    clear_env();
    let config = Config::load(std::path::Path::new("/nonexistent/coderag.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
#[serial]
fn parse_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[api]
base_url = "http://models:8080/v1"

[reranking]
strategy = "judgment"
max_candidates = 10

[search]
top_k = 8
use_reranking = false
"#,
    );

    clear_env();
    let config = Config::load(&path).unwrap();
    assert_eq!(config.api.base_url, "http://models:8080/v1");
    assert_eq!(config.api.embedding_model, "text-embedding-qwen3-embedding-4b");
    assert_eq!(config.reranking.strategy, RerankStrategy::Judgment);
    assert_eq!(config.reranking.max_candidates, 10);
    assert_eq!(config.reranking.parallelism, 4);
    assert_eq!(config.search.top_k, 8);
    assert!(!config.search.use_reranking);
    assert_eq!(config.index.max_chunk_tokens, 500);
}

#[test]
#[serial]
fn invalid_toml_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[search]\ntop_k = \"many\"\n");
    clear_env();
    assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
}

#[test]
#[serial]
fn unknown_strategy_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[reranking]\nstrategy = \"vibes\"\n");
    clear_env();
    assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[search]\ntop_k = 8\n");

    clear_env();
    unsafe {
        std::env::set_var("CODERAG_API_BASE", "http://env:9000/v1");
        std::env::set_var("CODERAG_API_KEY", "sk-test");
        std::env::set_var("CODERAG_TOP_K", "3");
        std::env::set_var("CODERAG_RERANK_STRATEGY", "Judgment");
        std::env::set_var("CODERAG_USE_RERANKING", "false");
        std::env::set_var("CODERAG_DB_PATH", "/tmp/x.db");
        std::env::set_var("CODERAG_EMBEDDING_BATCH_SIZE", "16");
    }
    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.api.base_url, "http://env:9000/v1");
    assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.search.top_k, 3);
    assert_eq!(config.reranking.strategy, RerankStrategy::Judgment);
    assert!(!config.search.use_reranking);
    assert_eq!(config.index.db_path, "/tmp/x.db");
    assert_eq!(config.embedding.batch_size, 16);
}

#[test]
#[serial]
fn unparsable_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("CODERAG_TOP_K", "lots");
        std::env::set_var("CODERAG_USE_RERANKING", "maybe");
        std::env::set_var("CODERAG_TIMEOUT_SECS", "-1");
    }
    let config = Config::load(std::path::Path::new("/nonexistent/coderag.toml")).unwrap();
    clear_env();

    assert_eq!(config.search.top_k, 5);
    assert!(config.search.use_reranking);
    assert_eq!(config.api.timeout_secs, 300);
}

#[test]
#[serial]
fn empty_api_key_is_none() {
    clear_env();
    unsafe { std::env::set_var("CODERAG_API_KEY", "") };
    let config = Config::load(std::path::Path::new("/nonexistent/coderag.toml")).unwrap();
    clear_env();
    assert!(config.api_key.is_none());
}

#[test]
fn api_key_is_never_serialized() {
    let config = Config {
        api_key: Some("sk-secret".into()),
        ..Config::default()
    };
    let rendered = config.to_toml().unwrap();
    assert!(!rendered.contains("sk-secret"));
    assert!(rendered.contains("[search]"));
}

#[test]
fn rendered_config_parses_back() {
    let mut config = Config::default();
    config.reranking.strategy = RerankStrategy::Judgment;
    config.search.top_k = 9;
    let parsed: Config = toml::from_str(&config.to_toml().unwrap()).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn validate_rejects_empty_base_url() {
    let mut config = Config::default();
    config.api.base_url = "  ".into();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("api.base_url"));
}

#[test]
fn validate_rejects_zero_ceilings() {
    let mut config = Config::default();
    config.search.top_k = 0;
    assert!(config.validate().unwrap_err().to_string().contains("search.top_k"));

    let mut config = Config::default();
    config.embedding.batch_size = 0;
    assert!(
        config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("embedding.batch_size")
    );
}

#[test]
fn reranking_model_required_only_when_enabled() {
    let mut config = Config::default();
    config.api.reranking_model = String::new();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    config.search.use_reranking = false;
    config.validate().unwrap();
}

#[test]
fn strategy_from_str() {
    assert_eq!("direct".parse::<RerankStrategy>(), Ok(RerankStrategy::Direct));
    assert_eq!(" JUDGMENT ".parse::<RerankStrategy>(), Ok(RerankStrategy::Judgment));
    assert!("other".parse::<RerankStrategy>().is_err());
    assert_eq!(RerankStrategy::Judgment.to_string(), "judgment");
}
