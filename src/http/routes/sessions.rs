//! `/sessions/*` — maps directly onto `FileSessionStore` operations (§4.4),
//! mirroring the teacher's thin-handler style: validate, delegate to the
//! store, map the result/error straight to JSON.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::errors::ErrorKind;
use crate::http::{ApiError, SharedState};
use crate::store::{CreateSessionRequest, SessionListFilter, SessionPatch};

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create))
        .route("/sessions/list", get(list))
        .route("/sessions/cleanup", post(cleanup))
        .route("/sessions/storage/stats", get(storage_stats))
        .route("/sessions/{id}", get(get_session).put(update).delete(delete_session))
        .route("/sessions/{id}/save-state", post(save_state))
        .route("/sessions/{id}/restore", post(restore))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

async fn create(State(state): State<SharedState>, Json(body): Json<CreateSessionBody>) -> Result<Json<crate::domain::Session>, ApiError> {
    let session = state
        .store
        .create(CreateSessionRequest {
            title: body.title,
            description: body.description,
            topic: body.topic,
            tags: body.tags,
            research_config: None,
        })
        .await
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub status: Option<crate::domain::SessionStatus>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

fn default_page() -> usize {
    1
}
fn default_page_size() -> usize {
    20
}

async fn list(State(state): State<SharedState>, Query(query): Query<ListQuery>) -> Result<Json<serde_json::Value>, ApiError> {
    let page = state
        .store
        .list(
            query.page,
            query.page_size,
            SessionListFilter {
                status: query.status,
                tag: query.tag,
                search: query.search,
            },
        )
        .await
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(serde_json::json!({
        "sessions": page.sessions,
        "total_count": page.total_count,
        "page": page.page,
        "page_size": page.page_size,
    })))
}

async fn get_session(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<crate::domain::Session>, ApiError> {
    let session = state.store.get(&id).await.map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionBody {
    pub title: Option<String>,
    pub description: Option<String>,
    pub topic: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub status: Option<crate::domain::SessionStatus>,
}

async fn update(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSessionBody>,
) -> Result<Json<crate::domain::Session>, ApiError> {
    let session = state
        .store
        .update(
            &id,
            SessionPatch {
                title: body.title,
                description: body.description,
                topic: body.topic,
                tags: body.tags,
                status: body.status,
            },
        )
        .await
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(session))
}

async fn delete_session(State(state): State<SharedState>, Path(id): Path<String>) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete(&id).await.map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SaveStateBody {
    pub phase: crate::domain::SessionPhase,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub questions: Option<Vec<String>>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub report_plan: Option<String>,
    #[serde(default)]
    pub search_tasks: Option<Vec<crate::domain::SearchTask>>,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

async fn save_state(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<SaveStateBody>,
) -> Result<Json<crate::domain::Session>, ApiError> {
    let session = state
        .store
        .save_phase_state(
            &id,
            body.phase,
            crate::store::PhaseStateUpdate {
                topic: body.topic,
                questions: body.questions,
                feedback: body.feedback,
                report_plan: body.report_plan,
                search_tasks: body.search_tasks,
                final_report: body.final_report,
                research_config: None,
            },
            body.task_id.as_deref(),
        )
        .await
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize, Default)]
pub struct RestoreBody {
    #[serde(default)]
    pub continue_from_phase: Option<crate::domain::SessionPhase>,
}

async fn restore(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Option<Json<RestoreBody>>,
) -> Result<Json<crate::domain::RestorationData>, ApiError> {
    let continue_from_phase = body.map(|b| b.0.continue_from_phase).unwrap_or(None);
    let restoration = state
        .store
        .restore(&id, continue_from_phase)
        .await
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(restoration))
}

#[derive(Debug, Deserialize, Default)]
pub struct CleanupBody {
    #[serde(default = "default_cleanup_age")]
    pub days_old: i64,
}

fn default_cleanup_age() -> i64 {
    90
}

async fn cleanup(State(state): State<SharedState>, body: Option<Json<CleanupBody>>) -> Result<Json<serde_json::Value>, ApiError> {
    let days_old = body.map(|b| b.0.days_old).unwrap_or_else(default_cleanup_age);
    let archived = state.store.cleanup(days_old).await.map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(serde_json::json!({ "archived": archived })))
}

async fn storage_stats(State(state): State<SharedState>) -> Result<Json<crate::store::StorageStats>, ApiError> {
    let stats = state.store.storage_stats().await.map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(stats))
}
