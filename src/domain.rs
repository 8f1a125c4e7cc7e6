//! Core data model: the durable [`Session`] and its artifacts, the volatile
//! [`Task`], and the [`ProgressFrame`] wire type.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Archived,
    Failed,
}

/// Ordered so that `Ord` reflects the forward phase progression a session
/// is expected to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Topic,
    Questions,
    Feedback,
    Research,
    Report,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTask {
    pub query: String,
    pub research_goal: String,
    pub state: SearchTaskState,
    #[serde(default)]
    pub learning: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl SearchTask {
    pub fn pending(query: String, research_goal: String) -> Self {
        Self {
            query,
            research_goal,
            state: SearchTaskState::Pending,
            learning: String::new(),
            sources: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn failed(query: String, research_goal: String, learning: String) -> Self {
        Self {
            query,
            research_goal,
            state: SearchTaskState::Failed,
            learning,
            sources: Vec::new(),
            images: Vec::new(),
        }
    }
}

/// `{models_config, enable_web_search, research_depth, language, output_format, execution_mode}`,
/// fixed at task start and carried forward in the Session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub thinking_model: String,
    pub task_model: String,
    pub enable_web_search: bool,
    pub research_depth: String,
    pub language: String,
    pub output_format: String,
    pub execution_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub status: SessionStatus,
    pub current_phase: SessionPhase,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub report_plan: Option<String>,
    #[serde(default)]
    pub search_tasks: Vec<SearchTask>,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub research_config: Option<ResearchConfig>,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

impl Session {
    /// Pure function of `current_phase` and the presence/absence of the
    /// listed fields, never stored ahead of its inputs — a phase-driven
    /// base plus per-artifact bonuses.
    pub fn completion_percentage(&self) -> u8 {
        let base: f64 = match self.current_phase {
            SessionPhase::Topic => 10.0,
            SessionPhase::Questions => 25.0,
            SessionPhase::Feedback => 40.0,
            SessionPhase::Research => 70.0,
            SessionPhase::Report => 90.0,
            SessionPhase::Completed => 100.0,
        };
        let mut bonus = 0.0;
        if self.topic.is_some() {
            bonus += 5.0;
        }
        if !self.questions.is_empty() {
            bonus += 5.0;
        }
        if self.report_plan.is_some() {
            bonus += 5.0;
        }
        if !self.search_tasks.is_empty() {
            bonus += 10.0;
        }
        if self.final_report.is_some() {
            bonus += 10.0;
        }
        (base + bonus).min(100.0).round() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Volatile, in-memory record for an active phase execution. Owned by the
/// Task Registry; the cancellation flag is a separate atomic so a worker can
/// observe it without holding the registry's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub sources_found: u64,
    #[serde(default)]
    pub search_queries_made: u64,
    #[serde(default)]
    pub report: Option<serde_json::Value>,
}

impl Task {
    pub fn new(task_id: String, session_id: Option<String>) -> Self {
        Self {
            task_id,
            session_id,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: "Queued".to_string(),
            started_at: Utc::now(),
            estimated_completion: None,
            tokens_used: 0,
            sources_found: 0,
            search_queries_made: 0,
            report: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Connection,
    Waiting,
    Progress,
    Completed,
    Error,
}

impl FrameType {
    pub fn is_terminal(self) -> bool {
        matches!(self, FrameType::Completed | FrameType::Error)
    }
}

/// Immutable progress message, `{type, task_id, timestamp, data}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ProgressFrame {
    pub fn from_task(frame_type: FrameType, task: &Task) -> Self {
        Self {
            frame_type,
            task_id: task.task_id.clone(),
            timestamp: Utc::now(),
            data: serde_json::json!({
                "status": task.status,
                "progress_percentage": task.progress,
                "current_step": task.current_step,
                "tokens_used": task.tokens_used,
                "sources_found": task.sources_found,
                "estimated_completion": task.estimated_completion,
            }),
        }
    }

    pub fn connection(task_id: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Connection,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        }
    }

    pub fn waiting(task_id: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Waiting,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        }
    }

    pub fn error(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Error,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            data: serde_json::json!({ "error": message.into() }),
        }
    }
}

/// `SessionRestoreResponse.restoration_data` — note the camelCase field
/// names, which diverge from the rest of the (snake_case) wire shapes
/// because the consuming frontend expects this exact payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorationData {
    pub session_id: String,
    pub phase: SessionPhase,
    pub topic: Option<String>,
    pub questions: Vec<String>,
    pub feedback: String,
    pub report_plan: Option<String>,
    pub search_tasks: Vec<SearchTask>,
    pub final_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_config: Option<ResearchConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_session() -> Session {
        Session {
            session_id: "s-1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            title: String::new(),
            description: String::new(),
            topic: None,
            tags: BTreeSet::new(),
            status: SessionStatus::Active,
            current_phase: SessionPhase::Topic,
            questions: Vec::new(),
            feedback: String::new(),
            report_plan: None,
            search_tasks: Vec::new(),
            final_report: None,
            research_config: None,
            task_ids: Vec::new(),
        }
    }

    #[test]
    fn completion_percentage_topic_with_no_artifacts_is_base_only() {
        let session = base_session();
        assert_eq!(session.completion_percentage(), 10);
    }

    #[test]
    fn completion_percentage_adds_bonuses_for_present_artifacts() {
        let mut session = base_session();
        session.current_phase = SessionPhase::Research;
        session.topic = Some("storage engines".to_string());
        session.questions = vec!["q1".to_string()];
        session.search_tasks = vec![SearchTask::pending("q".to_string(), "g".to_string())];
        // base 70 + topic 5 + questions 5 + search_tasks 10 = 90
        assert_eq!(session.completion_percentage(), 90);
    }

    #[test]
    fn completion_percentage_never_exceeds_100() {
        let mut session = base_session();
        session.current_phase = SessionPhase::Completed;
        session.topic = Some("x".to_string());
        session.questions = vec!["q".to_string()];
        session.report_plan = Some("plan".to_string());
        session.search_tasks = vec![SearchTask::pending("q".to_string(), "g".to_string())];
        session.final_report = Some("report".to_string());
        assert_eq!(session.completion_percentage(), 100);
    }

    #[test]
    fn session_phase_ordering_reflects_forward_progression() {
        assert!(SessionPhase::Topic < SessionPhase::Questions);
        assert!(SessionPhase::Research < SessionPhase::Report);
        assert!(SessionPhase::Report < SessionPhase::Completed);
    }

    #[test]
    fn restoration_data_serializes_with_camel_case_field_names() {
        let data = RestorationData {
            session_id: "s-1".to_string(),
            phase: SessionPhase::Research,
            topic: Some("t".to_string()),
            questions: vec![],
            feedback: String::new(),
            report_plan: None,
            search_tasks: vec![],
            final_report: None,
            current_task_id: Some("tsk-1".to_string()),
            research_config: None,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert!(json.get("reportPlan").is_some());
        assert!(json.get("searchTasks").is_some());
        assert!(json.get("finalReport").is_some());
        assert!(json.get("currentTaskId").is_some());
    }

    #[test]
    fn progress_frame_completed_and_error_types_are_terminal() {
        assert!(FrameType::Completed.is_terminal());
        assert!(FrameType::Error.is_terminal());
        assert!(!FrameType::Progress.is_terminal());
        assert!(!FrameType::Connection.is_terminal());
        assert!(!FrameType::Waiting.is_terminal());
    }
}
