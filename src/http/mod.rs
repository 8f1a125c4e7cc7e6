//! HTTP/WebSocket wiring layer: realizes the external interfaces directly on
//! top of the Pipeline Engine, Task Registry, and Session Store, mirroring
//! the teacher's `factory::server`/`factory::api`/`factory::ws` split. Auth,
//! TLS termination, and reverse-proxying stay the deploying application's
//! concern — this module only adds routing, request/response mapping, and
//! the WebSocket upgrade/keepalive loop.

pub mod routes;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::errors::CoreErrorKind;
use crate::llm::{LlmAdapter, ModelCatalog};
use crate::pipeline::PipelineEngine;
use crate::registry::TaskRegistry;
use crate::search::SearchAdapter;
use crate::store::FileSessionStore;

/// Shared application state, handed to every handler via `State<SharedState>`.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<FileSessionStore>,
    pub engine: Arc<PipelineEngine>,
    pub llm: Arc<dyn LlmAdapter>,
    pub search: Arc<dyn SearchAdapter>,
    pub model_catalog: Arc<ModelCatalog>,
}

pub type SharedState = Arc<AppState>;

pub struct ServerConfig {
    pub bind_addr: String,
    /// When set, attaches a permissive CORS layer suitable for local/internal
    /// deployment — the same default the teacher applies in dev mode.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            dev_mode: false,
        }
    }
}

/// Uniform JSON error envelope for every handler in this layer. Each
/// subsystem error converts to one of these via its `ErrorKind::kind()`.
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn from_kind(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            CoreErrorKind::Validation | CoreErrorKind::ParseError | CoreErrorKind::ContextTooLarge => {
                ApiError::Validation(message)
            }
            CoreErrorKind::NotFound => ApiError::NotFound(message),
            CoreErrorKind::UpstreamTimeout
            | CoreErrorKind::UpstreamFailure
            | CoreErrorKind::Cancelled
            | CoreErrorKind::Internal => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

async fn health_check() -> &'static str {
    "ok"
}

/// Composes every route group onto one router with `state` already attached.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .merge(routes::research::router())
        .merge(routes::sessions::router())
        .merge(ws::router())
        .route("/health", get(health_check))
        .with_state(state)
}

/// Binds `config.bind_addr`, optionally layering permissive CORS for dev
/// mode, and serves until `shutdown_signal` resolves (Ctrl+C).
pub async fn start_server(config: ServerConfig, state: SharedState) -> anyhow::Result<()> {
    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::GenerateRequest;
    use crate::llm::GenerateResponse;
    use crate::errors::LlmAdapterError;
    use crate::errors::SearchAdapterError;
    use crate::search::SearchHit;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    struct NoopLlm;

    #[async_trait]
    impl LlmAdapter for NoopLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, LlmAdapterError> {
            Ok(GenerateResponse {
                text: "1. question one\n2. question two\n3. question three\n4. question four\n5. question five".to_string(),
                tokens_used: 10,
            })
        }

        async fn list_models(&self) -> Result<Vec<crate::llm::ModelInfo>, LlmAdapterError> {
            Ok(vec![])
        }
    }

    struct NoopSearch;

    #[async_trait]
    impl SearchAdapter for NoopSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<SearchHit, SearchAdapterError> {
            Ok(SearchHit {
                sources: vec![],
                images: vec![],
            })
        }
    }

    pub(crate) fn test_state() -> SharedState {
        let config = Config::default();
        Arc::new(AppState {
            registry: TaskRegistry::new(Duration::from_millis(50)),
            store: Arc::new(FileSessionStore::new(tempfile::tempdir().unwrap().keep())),
            engine: Arc::new(PipelineEngine::new(Arc::new(NoopLlm), config.max_total_prompt_chars)),
            llm: Arc::new(NoopLlm),
            search: Arc::new(NoopSearch),
            model_catalog: Arc::new(ModelCatalog::new(Duration::from_secs(config.model_catalog_ttl_secs))),
            config,
        })
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }
}
