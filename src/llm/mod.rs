//! Model Adapter & Agent Cache: a single `generate`/`list_models` surface
//! over heterogeneous model families, with agent reuse and a refreshable
//! model catalog.

mod catalog;
mod openai_compatible;

pub use catalog::ModelCatalog;
pub use openai_compatible::OpenAiCompatibleAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::LlmAdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Thinking,
    Task,
    Specialist,
    Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: String,
    pub model_type: ModelType,
    pub max_tokens: u32,
    pub supports_tools: bool,
    pub supports_agents: bool,
    pub cost_per_1k_tokens: f64,
    pub description: String,
}

/// A single request to the model adapter. Callers always pass one
/// `max_tokens` and one `temperature`; the adapter decides internally
/// whether the target model accepts both or only the former.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub model: String,
    pub agent_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub grounding: bool,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmAdapterError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmAdapterError>;
}

/// Recognizes model families by name prefix/substring. Reasoning-family
/// models (matching "o1"/"chato1", case-insensitively) take
/// `max_completion_tokens` and no `temperature`; everything else takes
/// `max_tokens` and `temperature`. This mirrors the original's
/// `_get_agent_params_for_model` keyword check exactly.
pub fn is_reasoning_family(model: &str) -> bool {
    let lower = model.to_lowercase();
    ["o1", "chato1"].iter().any(|kw| lower.contains(kw))
}

/// Caches an opaque agent handle per `agent_name` so repeated calls with the
/// same name reuse the same stateful "assistant" resource instead of
/// recreating it. Agent creation is modeled here only as the caching
/// mechanism; concrete adapters decide what an "agent" actually is.
pub struct AgentCache {
    agents: Mutex<HashMap<String, String>>,
}

impl Default for AgentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentCache {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached agent id for `name` if present, otherwise calls
    /// `create` to mint one and caches it. If `create` fails, falls back to
    /// a nameless, tool-less agent id derived from `model` — logged, never
    /// surfaced as an error.
    pub fn get_or_create<F>(&self, name: &str, model: &str, create: F) -> String
    where
        F: FnOnce() -> Result<String, anyhow::Error>,
    {
        {
            let agents = self.agents.lock().expect("agent cache lock poisoned");
            if let Some(id) = agents.get(name) {
                return id.clone();
            }
        }
        let id = match create() {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(agent_name = name, model, error = %err, "agent creation failed, falling back to nameless agent");
                format!("nameless:{model}")
            }
        };
        self.agents
            .lock()
            .expect("agent cache lock poisoned")
            .insert(name.to_string(), id.clone());
        id
    }
}
