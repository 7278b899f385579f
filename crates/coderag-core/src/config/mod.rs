mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "coderag.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist. The result is not validated;
    /// call [`Config::validate`] before building the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
        }
        if self.api.embedding_model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "api.embedding_model must not be empty".into(),
            ));
        }
        if self.search.use_reranking && self.api.reranking_model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "api.reranking_model must not be empty while search.use_reranking is on".into(),
            ));
        }

        let non_zero = [
            ("index.max_chunk_tokens", self.index.max_chunk_tokens),
            ("index.file_parallelism", self.index.file_parallelism),
            ("embedding.batch_size", self.embedding.batch_size),
            ("embedding.parallelism", self.embedding.parallelism),
            ("embedding.max_input_tokens", self.embedding.max_input_tokens),
            ("reranking.parallelism", self.reranking.parallelism),
            ("search.top_k", self.search.top_k),
            ("search.over_fetch_factor", self.search.over_fetch_factor),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        Ok(())
    }

    /// Render as TOML, as written by `coderag init`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
