use std::path::PathBuf;

use coderag_core::config::{Config, DEFAULT_CONFIG_PATH, RerankStrategy};
use dialoguer::{Confirm, Input, Select};

#[derive(Default)]
#[cfg_attr(test, derive(Clone))]
pub(crate) struct WizardState {
    pub(crate) base_url: Option<String>,
    pub(crate) embedding_model: Option<String>,
    pub(crate) use_reranking: bool,
    pub(crate) reranking_model: Option<String>,
    pub(crate) strategy: RerankStrategy,
    pub(crate) db_path: Option<String>,
    pub(crate) max_chunk_tokens: Option<usize>,
    pub(crate) top_k: Option<usize>,
}

pub fn run(output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("coderag init - configuration wizard\n");

    let mut state = WizardState {
        use_reranking: true,
        ..WizardState::default()
    };

    step_server(&mut state)?;
    step_reranking(&mut state)?;
    step_index(&mut state)?;
    step_review_and_write(&state, output)?;

    Ok(())
}

fn step_server(state: &mut WizardState) -> anyhow::Result<()> {
    println!("== Step 1/4: Model server ==\n");
    let defaults = Config::default();

    state.base_url = Some(
        Input::new()
            .with_prompt("OpenAI-compatible base URL")
            .default(defaults.api.base_url)
            .interact_text()?,
    );
    state.embedding_model = Some(
        Input::new()
            .with_prompt("Embedding model")
            .default(defaults.api.embedding_model)
            .interact_text()?,
    );

    println!();
    Ok(())
}

fn step_reranking(state: &mut WizardState) -> anyhow::Result<()> {
    println!("== Step 2/4: Reranking ==\n");
    let defaults = Config::default();

    state.use_reranking = Confirm::new()
        .with_prompt("Rerank vector results with a second model?")
        .default(true)
        .interact()?;

    if state.use_reranking {
        state.reranking_model = Some(
            Input::new()
                .with_prompt("Reranking model")
                .default(defaults.api.reranking_model)
                .interact_text()?,
        );
        let strategies = [
            "Direct (server exposes /rerank)",
            "Judgment (chat completions with logprobs)",
        ];
        let selection = Select::new()
            .with_prompt("Reranking strategy")
            .items(strategies)
            .default(0)
            .interact()?;
        state.strategy = if selection == 1 {
            RerankStrategy::Judgment
        } else {
            RerankStrategy::Direct
        };
    }

    println!();
    Ok(())
}

fn step_index(state: &mut WizardState) -> anyhow::Result<()> {
    println!("== Step 3/4: Index ==\n");
    let defaults = Config::default();

    state.db_path = Some(
        Input::new()
            .with_prompt("Index database path")
            .default(defaults.index.db_path)
            .interact_text()?,
    );
    state.max_chunk_tokens = Some(
        Input::new()
            .with_prompt("Maximum tokens per chunk")
            .default(defaults.index.max_chunk_tokens)
            .interact_text()?,
    );
    state.top_k = Some(
        Input::new()
            .with_prompt("Results per search")
            .default(defaults.search.top_k)
            .interact_text()?,
    );

    println!();
    Ok(())
}

pub(crate) fn build_config(state: &WizardState) -> Config {
    let mut config = Config::default();
    if let Some(url) = &state.base_url {
        config.api.base_url.clone_from(url);
    }
    if let Some(model) = &state.embedding_model {
        config.api.embedding_model.clone_from(model);
    }
    config.search.use_reranking = state.use_reranking;
    if let Some(model) = &state.reranking_model {
        config.api.reranking_model.clone_from(model);
    }
    config.reranking.strategy = state.strategy;
    if let Some(path) = &state.db_path {
        config.index.db_path.clone_from(path);
    }
    if let Some(tokens) = state.max_chunk_tokens {
        config.index.max_chunk_tokens = tokens;
    }
    if let Some(k) = state.top_k {
        config.search.top_k = k;
    }
    config
}

fn step_review_and_write(state: &WizardState, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("== Step 4/4: Review & Write ==\n");

    let config = build_config(state);
    if let Err(e) = config.validate() {
        anyhow::bail!("generated configuration is invalid: {e}");
    }
    let toml_str = config.to_toml()?;

    println!("--- Generated config ---");
    println!("{toml_str}");
    println!("------------------------\n");

    let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let path = output.unwrap_or_else(|| {
        Input::new()
            .with_prompt("Write config to")
            .default(default_path.display().to_string())
            .interact_text()
            .map(PathBuf::from)
            .unwrap_or(default_path)
    });

    if path.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!("{} already exists. Overwrite?", path.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Aborted.");
            return Ok(());
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &toml_str)?;
    println!("Config written to {}", path.display());

    println!("\nNext steps:");
    println!("  1. If the server needs a key: export CODERAG_API_KEY=...");
    println!("  2. Run: coderag --config {} index .", path.display());
    println!("  3. Then: coderag --config {} search \"<query>\"", path.display());
    Ok(())
}
