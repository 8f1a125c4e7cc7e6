//! Durable, crash-safe home for Sessions and their artifacts. One
//! lightweight metadata index (for cheap listing) plus one content file
//! per session, both written via write-to-temp-then-rename.

mod atomic;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{
    RestorationData, ResearchConfig, SearchTask, Session, SessionPhase, SessionStatus,
};
use crate::errors::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub title: String,
    pub description: String,
    pub status: SessionStatus,
    pub current_phase: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: std::collections::BTreeSet<String>,
}

impl From<&Session> for SessionMetadata {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            title: session.title.clone(),
            description: session.description.clone(),
            status: session.status,
            current_phase: session.current_phase,
            created_at: session.created_at,
            updated_at: session.updated_at,
            tags: session.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    pub title: String,
    pub description: String,
    pub topic: Option<String>,
    pub tags: std::collections::BTreeSet<String>,
    pub research_config: Option<ResearchConfig>,
}

/// Non-null fields overwrite; absent (`None`) fields leave the stored value
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub topic: Option<String>,
    pub tags: Option<std::collections::BTreeSet<String>>,
    pub status: Option<SessionStatus>,
}

/// A subset of phase artifacts, applied by `save_phase_state`.
#[derive(Debug, Clone, Default)]
pub struct PhaseStateUpdate {
    pub topic: Option<String>,
    pub questions: Option<Vec<String>>,
    pub feedback: Option<String>,
    pub report_plan: Option<String>,
    pub search_tasks: Option<Vec<SearchTask>>,
    pub final_report: Option<String>,
    pub research_config: Option<ResearchConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionListFilter {
    pub status: Option<SessionStatus>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionListPage {
    pub sessions: Vec<SessionMetadata>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_bytes: u64,
}

pub struct FileSessionStore {
    dir: PathBuf,
    // Serializes all writes to the store. Coarser than "per session_id" but
    // correct: only per-session serialization is actually required, and
    // write volume here is low enough that a store-wide lock is not a
    // bottleneck.
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("sessions_index.json")
    }

    fn content_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn read_index(&self) -> Result<Vec<SessionMetadata>, StoreError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path).map_err(|source| StoreError::ReadFailed {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(StoreError::Codec)
    }

    fn write_index(&self, entries: &[SessionMetadata]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entries).map_err(StoreError::Codec)?;
        atomic::write_atomic(&self.index_path(), &json)
    }

    fn read_content(&self, session_id: &str) -> Result<Session, StoreError> {
        let path = self.content_path(session_id);
        if !path.exists() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| StoreError::ReadFailed {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(StoreError::Codec)
    }

    fn write_content(&self, session: &Session) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(session).map_err(StoreError::Codec)?;
        atomic::write_atomic(&self.content_path(&session.session_id), &json)
    }

    pub async fn create(&self, request: CreateSessionRequest) -> Result<Session, StoreError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let current_phase = if request.topic.is_some() {
            SessionPhase::Questions
        } else {
            SessionPhase::Topic
        };
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title: request.title,
            description: request.description,
            topic: request.topic,
            tags: request.tags,
            status: SessionStatus::Active,
            current_phase,
            questions: Vec::new(),
            feedback: String::new(),
            report_plan: None,
            search_tasks: Vec::new(),
            final_report: None,
            research_config: request.research_config,
            task_ids: Vec::new(),
        };

        self.write_content(&session)?;
        let mut index = self.read_index()?;
        index.push(SessionMetadata::from(&session));
        self.write_index(&index)?;
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.read_content(session_id)
    }

    pub async fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.read_content(session_id)?;
        if let Some(title) = patch.title {
            session.title = title;
        }
        if let Some(description) = patch.description {
            session.description = description;
        }
        if let Some(topic) = patch.topic {
            session.topic = Some(topic);
        }
        if let Some(tags) = patch.tags {
            session.tags = tags;
        }
        if let Some(status) = patch.status {
            session.status = status;
        }
        session.updated_at = Utc::now();

        self.write_content(&session)?;
        self.update_index_entry(&session)?;
        Ok(session)
    }

    /// Privileged update: sets `current_phase`, merges any subset of phase
    /// artifacts, and appends `task_id` to `task_ids` if not already
    /// present. `current_phase` only moves forward through this path —
    /// callers that need to reposition backward use `restore`.
    pub async fn save_phase_state(
        &self,
        session_id: &str,
        phase: SessionPhase,
        update: PhaseStateUpdate,
        task_id: Option<&str>,
    ) -> Result<Session, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut session = self.read_content(session_id)?;

        if phase > session.current_phase {
            session.current_phase = phase;
        }
        if let Some(topic) = update.topic {
            session.topic = Some(topic);
        }
        if let Some(questions) = update.questions {
            session.questions = questions;
        }
        if let Some(feedback) = update.feedback {
            session.feedback = feedback;
        }
        if let Some(report_plan) = update.report_plan {
            session.report_plan = Some(report_plan);
        }
        if let Some(search_tasks) = update.search_tasks {
            session.search_tasks = search_tasks;
        }
        if let Some(final_report) = update.final_report {
            session.final_report = Some(final_report);
        }
        if let Some(research_config) = update.research_config {
            session.research_config = Some(research_config);
        }
        if let Some(task_id) = task_id {
            if !session.task_ids.iter().any(|t| t == task_id) {
                session.task_ids.push(task_id.to_string());
            }
        }
        session.updated_at = Utc::now();

        self.write_content(&session)?;
        self.update_index_entry(&session)?;
        Ok(session)
    }

    /// Repositions `current_phase` to any earlier phase, the one explicit
    /// carve-out for restore operations.
    pub async fn restore(
        &self,
        session_id: &str,
        continue_from_phase: Option<SessionPhase>,
    ) -> Result<RestorationData, StoreError> {
        let _guard = self.write_lock.lock().await;
        let session = self.read_content(session_id)?;
        let phase = continue_from_phase.unwrap_or(session.current_phase);

        Ok(RestorationData {
            session_id: session.session_id.clone(),
            phase,
            topic: session.topic.clone(),
            questions: session.questions.clone(),
            feedback: session.feedback.clone(),
            report_plan: session.report_plan.clone(),
            search_tasks: session.search_tasks.clone(),
            final_report: session.final_report.clone(),
            current_task_id: session.task_ids.last().cloned(),
            research_config: session.research_config.clone(),
        })
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let content_path = self.content_path(session_id);
        if content_path.exists() {
            std::fs::remove_file(&content_path).map_err(|source| StoreError::WriteFailed {
                path: content_path,
                source,
            })?;
        }
        let mut index = self.read_index()?;
        index.retain(|m| m.session_id != session_id);
        self.write_index(&index)?;
        Ok(())
    }

    pub async fn list(
        &self,
        page: usize,
        page_size: usize,
        filter: SessionListFilter,
    ) -> Result<SessionListPage, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.read_index()?;

        if let Some(status) = filter.status {
            index.retain(|m| m.status == status);
        }
        if let Some(tag) = &filter.tag {
            index.retain(|m| m.tags.contains(tag));
        }
        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            index.retain(|m| {
                m.title.to_lowercase().contains(&needle) || m.description.to_lowercase().contains(&needle)
            });
        }

        index.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let total_count = index.len();
        let page = page.max(1);
        let start = (page - 1) * page_size;
        let sessions = index.into_iter().skip(start).take(page_size).collect();

        Ok(SessionListPage {
            sessions,
            total_count,
            page,
            page_size,
        })
    }

    /// Flips `active` sessions older than `days_old` (by `updated_at`) to
    /// `archived`. Returns the number of sessions archived.
    pub async fn cleanup(&self, days_old: i64) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let cutoff = Utc::now() - ChronoDuration::days(days_old);
        let mut index = self.read_index()?;
        let mut archived = 0;

        for metadata in index.iter_mut() {
            if metadata.status == SessionStatus::Active && metadata.updated_at < cutoff {
                let mut session = self.read_content(&metadata.session_id)?;
                session.status = SessionStatus::Archived;
                self.write_content(&session)?;
                metadata.status = SessionStatus::Archived;
                archived += 1;
            }
        }
        self.write_index(&index)?;
        Ok(archived)
    }

    /// Total session count plus the on-disk footprint of the whole store
    /// directory, for the storage-stats endpoint.
    pub async fn storage_stats(&self) -> Result<StorageStats, StoreError> {
        let _guard = self.write_lock.lock().await;
        let index = self.read_index()?;
        let active_sessions = index.iter().filter(|m| m.status == SessionStatus::Active).count();

        let mut total_bytes = 0u64;
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir).map_err(|source| StoreError::ReadFailed {
                path: self.dir.clone(),
                source,
            })? {
                let entry = entry.map_err(|source| StoreError::ReadFailed {
                    path: self.dir.clone(),
                    source,
                })?;
                if let Ok(metadata) = entry.metadata() {
                    total_bytes += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            total_sessions: index.len(),
            active_sessions,
            total_bytes,
        })
    }

    fn update_index_entry(&self, session: &Session) -> Result<(), StoreError> {
        let mut index = self.read_index()?;
        match index.iter_mut().find(|m| m.session_id == session.session_id) {
            Some(entry) => *entry = SessionMetadata::from(session),
            None => index.push(SessionMetadata::from(session)),
        }
        self.write_index(&index)
    }
}

pub fn sessions_dir_default() -> PathBuf {
    Path::new("./data/sessions").to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (FileSessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileSessionStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn create_without_topic_starts_at_topic_phase() {
        let (store, _dir) = store().await;
        let session = store.create(CreateSessionRequest::default()).await.unwrap();
        assert_eq!(session.current_phase, SessionPhase::Topic);
    }

    #[tokio::test]
    async fn create_with_topic_starts_at_questions_phase() {
        let (store, _dir) = store().await;
        let session = store
            .create(CreateSessionRequest {
                topic: Some("storage engines".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(session.current_phase, SessionPhase::Questions);
    }

    #[tokio::test]
    async fn get_after_create_round_trips() {
        let (store, _dir) = store().await;
        let created = store
            .create(CreateSessionRequest {
                title: "t".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let fetched = store.get(&created.session_id).await.unwrap();
        assert_eq!(fetched.session_id, created.session_id);
        assert_eq!(fetched.title, "t");
    }

    #[tokio::test]
    async fn get_unknown_session_is_not_found() {
        let (store, _dir) = store().await;
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_merges_only_non_null_fields() {
        let (store, _dir) = store().await;
        let created = store
            .create(CreateSessionRequest {
                title: "original".to_string(),
                description: "desc".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let updated = store
            .update(
                &created.session_id,
                SessionPatch {
                    title: Some("new title".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "new title");
        assert_eq!(updated.description, "desc");
    }

    #[tokio::test]
    async fn save_phase_state_advances_phase_and_appends_task_id() {
        let (store, _dir) = store().await;
        let created = store.create(CreateSessionRequest::default()).await.unwrap();
        let updated = store
            .save_phase_state(
                &created.session_id,
                SessionPhase::Questions,
                PhaseStateUpdate {
                    questions: Some(vec!["q1".to_string()]),
                    ..Default::default()
                },
                Some("task-1"),
            )
            .await
            .unwrap();
        assert_eq!(updated.current_phase, SessionPhase::Questions);
        assert_eq!(updated.questions, vec!["q1".to_string()]);
        assert_eq!(updated.task_ids, vec!["task-1".to_string()]);

        // Appending the same task_id again must not duplicate it.
        let updated_again = store
            .save_phase_state(&created.session_id, SessionPhase::Questions, PhaseStateUpdate::default(), Some("task-1"))
            .await
            .unwrap();
        assert_eq!(updated_again.task_ids, vec!["task-1".to_string()]);
    }

    #[tokio::test]
    async fn save_phase_state_never_moves_phase_backward() {
        let (store, _dir) = store().await;
        let created = store.create(CreateSessionRequest::default()).await.unwrap();
        store
            .save_phase_state(&created.session_id, SessionPhase::Report, PhaseStateUpdate::default(), None)
            .await
            .unwrap();
        let result = store
            .save_phase_state(&created.session_id, SessionPhase::Questions, PhaseStateUpdate::default(), None)
            .await
            .unwrap();
        assert_eq!(result.current_phase, SessionPhase::Report);
    }

    #[tokio::test]
    async fn restore_defaults_to_current_phase_when_unspecified() {
        let (store, _dir) = store().await;
        let created = store.create(CreateSessionRequest::default()).await.unwrap();
        store
            .save_phase_state(&created.session_id, SessionPhase::Research, PhaseStateUpdate::default(), None)
            .await
            .unwrap();
        let restoration = store.restore(&created.session_id, None).await.unwrap();
        assert_eq!(restoration.phase, SessionPhase::Research);
    }

    #[tokio::test]
    async fn restore_can_reposition_to_an_earlier_phase() {
        let (store, _dir) = store().await;
        let created = store.create(CreateSessionRequest::default()).await.unwrap();
        store
            .save_phase_state(&created.session_id, SessionPhase::Report, PhaseStateUpdate::default(), None)
            .await
            .unwrap();
        let restoration = store
            .restore(&created.session_id, Some(SessionPhase::Research))
            .await
            .unwrap();
        assert_eq!(restoration.phase, SessionPhase::Research);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _dir) = store().await;
        let created = store.create(CreateSessionRequest::default()).await.unwrap();
        store.delete(&created.session_id).await.unwrap();
        store.delete(&created.session_id).await.unwrap();
        assert!(store.get(&created.session_id).await.is_err());
    }

    #[tokio::test]
    async fn list_sorts_by_updated_at_descending() {
        let (store, _dir) = store().await;
        let first = store
            .create(CreateSessionRequest {
                title: "first".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store
            .create(CreateSessionRequest {
                title: "second".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let page = store.list(1, 10, SessionListFilter::default()).await.unwrap();
        assert_eq!(page.sessions[0].session_id, second.session_id);
        assert_eq!(page.sessions[1].session_id, first.session_id);
    }

    #[tokio::test]
    async fn list_search_filters_case_insensitively_over_title_and_description() {
        let (store, _dir) = store().await;
        store
            .create(CreateSessionRequest {
                title: "Row vs Column Storage".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create(CreateSessionRequest {
                title: "Unrelated".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let page = store
            .list(
                1,
                10,
                SessionListFilter {
                    search: Some("storage".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.sessions.len(), 1);
    }

    #[tokio::test]
    async fn storage_stats_counts_sessions_and_bytes() {
        let (store, _dir) = store().await;
        store.create(CreateSessionRequest::default()).await.unwrap();
        store.create(CreateSessionRequest::default()).await.unwrap();
        let stats = store.storage_stats().await.unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 2);
        assert!(stats.total_bytes > 0);
    }

    #[tokio::test]
    async fn cleanup_archives_only_stale_active_sessions() {
        let (store, _dir) = store().await;
        let created = store.create(CreateSessionRequest::default()).await.unwrap();
        // Force the stored `updated_at` into the past to simulate staleness.
        let mut session = store.get(&created.session_id).await.unwrap();
        session.updated_at = Utc::now() - ChronoDuration::days(120);
        store.write_content(&session).unwrap();
        let mut index = store.read_index().unwrap();
        index[0].updated_at = session.updated_at;
        store.write_index(&index).unwrap();

        let archived = store.cleanup(90).await.unwrap();
        assert_eq!(archived, 1);
        let after = store.get(&created.session_id).await.unwrap();
        assert_eq!(after.status, SessionStatus::Archived);
    }
}
