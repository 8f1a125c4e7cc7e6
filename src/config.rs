//! Runtime configuration for the deep-research core.
//!
//! The core reads only this struct — resolving it from environment
//! variables, a TOML file, or hardcoded defaults is the embedding
//! application's concern (mirrors the teacher's `Config`/`ForgeConfig`
//! split, collapsed here since there is only one layer worth keeping).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Ceilings, TTLs, and other tunables: the prompt ceiling, the aggregation
/// ceiling, the per-source ceiling, the query ceiling, the search rate cap,
/// the model-catalog TTL, the idle-resend interval, and the session
/// cleanup age.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory the session store writes its metadata index and per-session
    /// content files to.
    pub sessions_dir: PathBuf,

    /// Hard ceiling on the total assembled prompt length, in characters.
    pub max_total_prompt_chars: usize,
    /// Ceiling on the aggregated search context, in characters.
    pub max_aggregate_context_chars: usize,
    /// Ceiling on a single source's content, in characters.
    pub max_source_content_chars: usize,
    /// Ceiling on a single search query, in characters.
    pub max_query_chars: usize,

    /// Default number of search results fetched per query.
    pub default_search_results: usize,
    /// Sliding-window request cap for the search adapter, requests/minute.
    pub search_requests_per_minute: u32,

    /// Model-catalog cache time-to-live, in seconds.
    pub model_catalog_ttl_secs: u64,
    /// How long the Broadcaster waits with no mutation before it re-emits
    /// the current snapshot, in seconds.
    pub idle_resend_interval_secs: u64,
    /// Grace period after a task's terminal frame before the registry
    /// evicts it, in seconds.
    pub task_eviction_grace_secs: u64,
    /// Age (in days) past which `cleanup` archives a session.
    pub session_cleanup_age_days: i64,

    /// Per-call timeout for LLM adapter invocations, in seconds.
    pub llm_call_timeout_secs: u64,
    /// Per-call timeout for search adapter invocations, in seconds.
    pub search_call_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("./data/sessions"),
            max_total_prompt_chars: 250_000,
            max_aggregate_context_chars: 240_000,
            max_source_content_chars: 80_000,
            max_query_chars: 400,
            default_search_results: 5,
            search_requests_per_minute: 60,
            model_catalog_ttl_secs: 30 * 60,
            idle_resend_interval_secs: 10,
            task_eviction_grace_secs: 1,
            session_cleanup_age_days: 90,
            llm_call_timeout_secs: 120,
            search_call_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file at {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise return the default config.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_ceilings() {
        let config = Config::default();
        assert_eq!(config.max_total_prompt_chars, 250_000);
        assert_eq!(config.max_aggregate_context_chars, 240_000);
        assert_eq!(config.max_source_content_chars, 80_000);
        assert_eq!(config.max_query_chars, 400);
        assert_eq!(config.model_catalog_ttl_secs, 1_800);
    }

    #[test]
    fn load_or_default_falls_back_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");
        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.max_query_chars, 400);
    }

    #[test]
    fn load_parses_partial_overrides_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_query_chars = 123\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_query_chars, 123);
        assert_eq!(config.max_total_prompt_chars, 250_000);
    }
}
