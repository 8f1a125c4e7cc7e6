//! An OpenAI-compatible chat-completions adapter, grounded in the same
//! request-shaping rules a thinking/task model roster needs: reasoning
//! models take `max_completion_tokens` and drop `temperature`, everything
//! else takes `max_tokens` and `temperature`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::{AgentCache, GenerateRequest, GenerateResponse, LlmAdapter, ModelInfo, is_reasoning_family};
use crate::errors::LlmAdapterError;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

pub struct OpenAiCompatibleAdapter {
    base_url: String,
    api_key: String,
    http: Client,
    timeout: Duration,
    agents: AgentCache,
}

impl OpenAiCompatibleAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: Client::new(),
            timeout,
            agents: AgentCache::new(),
        }
    }

    fn build_request_body(&self, request: &GenerateRequest) -> Value {
        let messages = serde_json::json!([
            {"role": "system", "content": request.system_prompt},
            {"role": "user", "content": request.prompt},
        ]);
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });
        if is_reasoning_family(&request.model) {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
            body["temperature"] = serde_json::json!(request.temperature);
        }
        body
    }

    async fn post_with_retry(&self, body: &Value) -> Result<Value, LlmAdapterError> {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .timeout(self.timeout)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| LlmAdapterError::Upstream(e.to_string()));
                    }
                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                        continue;
                    }
                    return Err(LlmAdapterError::Upstream(format!(
                        "model provider returned status {status}"
                    )));
                }
                Err(err) if err.is_timeout() => return Err(LlmAdapterError::Timeout),
                Err(err) if attempt < MAX_RETRIES => {
                    tracing::warn!(error = %err, attempt, "llm call failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(LlmAdapterError::Upstream(err.to_string())),
            }
        }
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatibleAdapter {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmAdapterError> {
        // Agent reuse is purely a caching concern here — the adapter itself
        // is stateless per call, but we still mint/cache an id so callers
        // that rely on `(agent_name)` reuse semantics observe the same
        // behavior a stateful agent-style backend would provide.
        let _agent_id = self.agents.get_or_create(&request.agent_name, &request.model, || {
            Ok(format!("{}:{}", request.agent_name, request.model))
        });

        let body = self.build_request_body(&request);
        let response = self.post_with_retry(&body).await?;

        let text = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let tokens_used = response
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0);

        Ok(GenerateResponse { text, tokens_used })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmAdapterError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmAdapterError::Timeout
                } else {
                    LlmAdapterError::Upstream(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(LlmAdapterError::Upstream(format!(
                "model listing returned status {}",
                response.status()
            )));
        }

        // The provider's native listing shape doesn't map cleanly onto
        // `ModelInfo`'s capability tagging, so a deployment-specific adapter
        // is expected to override this with its own catalog endpoint; the
        // generic implementation returns an empty list rather than
        // guessing at capability tags.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerateRequest;

    fn sample_request(model: &str) -> GenerateRequest {
        GenerateRequest {
            system_prompt: "sys".to_string(),
            prompt: "hi".to_string(),
            model: model.to_string(),
            agent_name: "agent".to_string(),
            max_tokens: 100,
            temperature: 0.7,
            grounding: false,
        }
    }

    #[test]
    fn reasoning_model_body_omits_temperature_uses_max_completion_tokens() {
        let adapter = OpenAiCompatibleAdapter::new("http://x", "key", Duration::from_secs(1));
        let body = adapter.build_request_body(&sample_request("o1-preview"));
        assert!(body.get("max_completion_tokens").is_some());
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn chat_model_body_uses_max_tokens_and_temperature() {
        let adapter = OpenAiCompatibleAdapter::new("http://x", "key", Duration::from_secs(1));
        let body = adapter.build_request_body(&sample_request("gpt-4"));
        assert!(body.get("max_tokens").is_some());
        assert!(body.get("temperature").is_some());
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn is_retryable_status_covers_common_transient_codes() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(code));
        }
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }
}
