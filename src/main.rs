//! Server entry point: reads configuration and deployment secrets from the
//! environment, wires the adapters into the core, and serves HTTP/WebSocket
//! traffic until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use deepresearch_core::config::Config;
use deepresearch_core::http::{self, AppState, ServerConfig};
use deepresearch_core::llm::{ModelCatalog, OpenAiCompatibleAdapter};
use deepresearch_core::pipeline::PipelineEngine;
use deepresearch_core::registry::TaskRegistry;
use deepresearch_core::search::TavilySearchAdapter;
use deepresearch_core::store::FileSessionStore;

/// Logs to stdout, plus a daily-rolling file under `DEEPRESEARCH_LOG_DIR`
/// when set. JSON formatting (for log aggregation) is opt-in via
/// `DEEPRESEARCH_LOG_JSON=1`; otherwise uses the human-readable format.
fn setup_logging() -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("DEEPRESEARCH_LOG_JSON").is_ok();

    let (file_layer, guard) = match std::env::var("DEEPRESEARCH_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "deepresearch-server.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(tracing_subscriber::fmt::layer().json().with_writer(non_blocking)), Some(guard))
        }
        Err(_) => (None, None),
    };

    let stdout_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Held for the process lifetime: dropping it stops the non-blocking
    // file writer from flushing.
    let _log_guard = setup_logging().context("failed to set up logging")?;

    let config_path = std::env::var("DEEPRESEARCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./deepresearch.toml"));
    let config = Config::load_or_default(&config_path).context("failed to load configuration")?;
    tracing::info!(path = %config_path.display(), "configuration loaded");

    std::fs::create_dir_all(&config.sessions_dir)
        .with_context(|| format!("failed to create sessions directory at {}", config.sessions_dir.display()))?;

    let llm_base_url = env_or("DEEPRESEARCH_LLM_BASE_URL", "https://api.openai.com/v1");
    let llm_api_key = std::env::var("DEEPRESEARCH_LLM_API_KEY").context("DEEPRESEARCH_LLM_API_KEY must be set")?;
    let search_api_key = std::env::var("DEEPRESEARCH_TAVILY_API_KEY").context("DEEPRESEARCH_TAVILY_API_KEY must be set")?;

    let llm = Arc::new(OpenAiCompatibleAdapter::new(
        llm_base_url,
        llm_api_key,
        Duration::from_secs(config.llm_call_timeout_secs),
    ));
    let search = Arc::new(TavilySearchAdapter::new(
        search_api_key,
        Duration::from_secs(config.search_call_timeout_secs),
        config.search_requests_per_minute,
    ));
    let model_catalog = Arc::new(ModelCatalog::new(Duration::from_secs(config.model_catalog_ttl_secs)));
    let engine = Arc::new(PipelineEngine::new(llm.clone(), config.max_total_prompt_chars));
    let store = Arc::new(FileSessionStore::new(config.sessions_dir.clone()));
    let registry = TaskRegistry::new(Duration::from_secs(config.task_eviction_grace_secs));
    registry.spawn_idle_resend_loop(Duration::from_secs(config.idle_resend_interval_secs));

    let state = Arc::new(AppState {
        registry,
        store,
        engine,
        llm,
        search,
        model_catalog,
        config,
    });

    let server_config = ServerConfig {
        bind_addr: env_or("DEEPRESEARCH_BIND_ADDR", "0.0.0.0:8080"),
        dev_mode: std::env::var("DEEPRESEARCH_DEV_MODE").is_ok(),
    };

    http::start_server(server_config, state).await
}
