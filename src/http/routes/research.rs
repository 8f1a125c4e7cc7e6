//! `/research/*` — realizes the research-phase endpoints in SPEC_FULL.md
//! §6 directly on top of the Pipeline Engine and Task Registry. Single-phase
//! endpoints (questions/plan/execute/final-report/customexport) run
//! synchronously and record their work under an ephemeral task entry so
//! `/research/status/{task_id}` stays uniform across every phase; `/start`
//! launches the full {questions → plan → execute → report} pipeline as a
//! background worker and returns immediately with a `websocket_url`.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregatorLimits, SearchAggregator};
use crate::domain::TaskStatus;
use crate::errors::ErrorKind;
use crate::http::{ApiError, SharedState};
use crate::pipeline::{
    CustomExportInput, ExecuteBackend, ExecuteInput, FinalReportInput, PlanInput, QuestionsInput,
};

const LANGUAGES: &[&str] = &["en", "es", "fr", "de", "it", "pt", "ru", "zh", "ja", "ko"];
const RESEARCH_DEPTHS: &[&str] = &["quick", "standard", "deep"];
const EXECUTION_MODES: &[&str] = &["auto", "agents", "direct"];

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/research/start", post(start))
        .route("/research/questions", post(questions))
        .route("/research/plan", post(plan))
        .route("/research/execute", post(execute_grounded))
        .route("/research/execute-tavily", post(execute_external))
        .route("/research/final-report", post(final_report))
        .route("/research/customexport", post(custom_export))
        .route("/research/status/{task_id}", get(status))
        .route("/research/report/{task_id}", get(report))
        .route("/research/cancel/{task_id}", delete(cancel))
        .route("/research/list", get(list))
        .route("/research/models", get(models))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub thinking: String,
    pub task: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchRequest {
    pub prompt: String,
    pub models_config: ModelsConfig,
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default = "default_research_depth")]
    pub research_depth: String,
    #[serde(default)]
    pub output_format: String,
    pub language: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_execution_mode")]
    pub execution_mode: String,
}

fn default_max_search_results() -> usize {
    10
}
fn default_research_depth() -> String {
    "standard".to_string()
}
fn default_execution_mode() -> String {
    "auto".to_string()
}

fn validate_prompt(prompt: &str) -> Result<(), ApiError> {
    let len = prompt.chars().count();
    if !(10..=20_000).contains(&len) {
        return Err(ApiError::Validation(format!(
            "prompt must be between 10 and 20000 characters, got {len}"
        )));
    }
    Ok(())
}

fn validate_language(language: &str) -> Result<(), ApiError> {
    if LANGUAGES.contains(&language) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("unknown language: {language}")))
    }
}

fn validate_research_depth(depth: &str) -> Result<(), ApiError> {
    if RESEARCH_DEPTHS.contains(&depth) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("unknown research_depth: {depth}")))
    }
}

fn validate_execution_mode(mode: &str) -> Result<(), ApiError> {
    if EXECUTION_MODES.contains(&mode) {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("unknown execution_mode: {mode}")))
    }
}

fn validate_request(request: &ResearchRequest) -> Result<(), ApiError> {
    validate_prompt(&request.prompt)?;
    validate_language(&request.language)?;
    validate_research_depth(&request.research_depth)?;
    validate_execution_mode(&request.execution_mode)?;
    if !(1..=20).contains(&request.max_search_results) {
        return Err(ApiError::Validation(
            "max_search_results must be between 1 and 20".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub sections: Vec<ReportSection>,
}

impl Report {
    fn single_section(title: &str, section_title: &str, content: String) -> Self {
        Self {
            title: title.to_string(),
            sections: vec![ReportSection {
                title: section_title.to_string(),
                content,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseResponse {
    pub task_id: String,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

fn websocket_url(task_id: &str) -> String {
    format!("/research/ws/{task_id}")
}

/// Runs a synchronous, single-phase handler under an ephemeral task record:
/// creates the task, runs `work`, then terminates it completed or failed so
/// `/research/status/{task_id}` stays uniform across every phase, matching
/// the "ephemeral one-off task ids" decision in DESIGN.md.
async fn run_ephemeral<F, Fut>(state: &SharedState, session_id: Option<String>, work: F) -> Result<PhaseResponse, ApiError>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<PhaseResponse, ApiError>>,
{
    let task_id = uuid::Uuid::new_v4().to_string();
    state
        .registry
        .create(&task_id, session_id, true)
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    state
        .registry
        .update(&task_id, |t| {
            t.status = TaskStatus::Running;
            t.current_step = "Running".to_string();
        })
        .ok();

    let result = work(task_id.clone()).await;

    match &result {
        Ok(response) => {
            state
                .registry
                .update(&task_id, |t| {
                    t.progress = 100;
                    t.current_step = "Completed".to_string();
                    t.report = response.report.as_ref().and_then(|r| serde_json::to_value(r).ok());
                })
                .ok();
            state.registry.terminate(&task_id, TaskStatus::Completed).await.ok();
        }
        Err(err) => {
            let message = err.message();
            state
                .registry
                .update(&task_id, |t| t.current_step = message.clone())
                .ok();
            state.registry.terminate(&task_id, TaskStatus::Failed).await.ok();
        }
    }

    result
}

async fn questions(State(state): State<SharedState>, Json(request): Json<ResearchRequest>) -> Result<Json<PhaseResponse>, ApiError> {
    validate_request(&request)?;
    let session_id = request.session_id.clone();
    let response = run_ephemeral(&state, session_id.clone(), |task_id| {
        let state = state.clone();
        let request = request.clone();
        async move {
            let output = state
                .engine
                .questions(QuestionsInput {
                    topic: request.prompt.clone(),
                    language: request.language.clone(),
                    model: request.models_config.thinking.clone(),
                })
                .await
                .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;

            if let Some(session_id) = &session_id {
                state
                    .store
                    .save_phase_state(
                        session_id,
                        crate::domain::SessionPhase::Questions,
                        crate::store::PhaseStateUpdate {
                            topic: Some(request.prompt.clone()),
                            questions: Some(output.questions.clone()),
                            ..Default::default()
                        },
                        Some(&task_id),
                    )
                    .await
                    .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
            }

            Ok(PhaseResponse {
                task_id,
                status: "completed".to_string(),
                message: "Questions generated".to_string(),
                report: Some(Report::single_section(
                    "Clarifying Questions",
                    "Clarifying Questions",
                    output.questions.join("\n"),
                )),
                progress: Some(100),
                websocket_url: None,
                data: None,
            })
        }
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub topic: String,
    pub questions: Vec<String>,
    #[serde(default)]
    pub feedback: String,
    pub request: ResearchRequest,
}

async fn plan(State(state): State<SharedState>, Json(body): Json<PlanRequest>) -> Result<Json<PhaseResponse>, ApiError> {
    validate_request(&body.request)?;
    let session_id = body.request.session_id.clone();
    let response = run_ephemeral(&state, session_id.clone(), |task_id| {
        let state = state.clone();
        async move {
            let output = state
                .engine
                .plan(PlanInput {
                    topic: body.topic.clone(),
                    questions: body.questions.clone(),
                    feedback: body.feedback.clone(),
                    language: body.request.language.clone(),
                    model: body.request.models_config.thinking.clone(),
                })
                .await
                .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;

            if let Some(session_id) = &session_id {
                state
                    .store
                    .save_phase_state(
                        session_id,
                        crate::domain::SessionPhase::Feedback,
                        crate::store::PhaseStateUpdate {
                            feedback: Some(body.feedback.clone()),
                            report_plan: Some(output.plan.clone()),
                            ..Default::default()
                        },
                        Some(&task_id),
                    )
                    .await
                    .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
            }

            Ok(PhaseResponse {
                task_id,
                status: "completed".to_string(),
                message: "Research plan generated".to_string(),
                report: Some(Report::single_section("Research Plan", "Research Plan", output.plan)),
                progress: Some(100),
                websocket_url: None,
                data: None,
            })
        }
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub topic: String,
    pub plan: String,
    pub request: ResearchRequest,
}

async fn run_execute(state: SharedState, body: ExecuteRequest, backend: ExecuteBackend) -> Result<Json<PhaseResponse>, ApiError> {
    validate_request(&body.request)?;
    let session_id = body.request.session_id.clone();
    let response = run_ephemeral(&state, session_id.clone(), |task_id| {
        let state = state.clone();
        async move {
            let aggregator = SearchAggregator::new(
                state.search.clone(),
                AggregatorLimits {
                    max_query_chars: state.config.max_query_chars,
                    max_source_content_chars: state.config.max_source_content_chars,
                    max_aggregate_context_chars: state.config.max_aggregate_context_chars,
                    default_search_results: body.request.max_search_results,
                },
            );
            let cancel = state
                .registry
                .cancel_flag(&task_id)
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
            let registry = state.registry.clone();
            let progress_task_id = task_id.clone();
            let output = state
                .engine
                .execute(
                    ExecuteInput {
                        topic: body.topic.clone(),
                        plan: body.plan.clone(),
                        language: body.request.language.clone(),
                        thinking_model: body.request.models_config.thinking.clone(),
                        task_model: body.request.models_config.task.clone(),
                    },
                    backend,
                    Some(&aggregator),
                    &cancel,
                    move |percent, step| {
                        registry
                            .update(&progress_task_id, |t| {
                                t.progress = percent;
                                t.current_step = step.to_string();
                                t.search_queries_made += 1;
                            })
                            .ok();
                    },
                )
                .await
                .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;

            if let Some(session_id) = &session_id {
                state
                    .store
                    .save_phase_state(
                        session_id,
                        crate::domain::SessionPhase::Research,
                        crate::store::PhaseStateUpdate {
                            search_tasks: Some(output.search_tasks.clone()),
                            ..Default::default()
                        },
                        Some(&task_id),
                    )
                    .await
                    .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
            }

            Ok(PhaseResponse {
                task_id,
                status: "completed".to_string(),
                message: "Research execution complete".to_string(),
                report: Some(Report::single_section(
                    "Research Execution Results",
                    "Research Execution Results",
                    output.aggregated_markdown,
                )),
                progress: Some(100),
                websocket_url: None,
                data: serde_json::to_value(output.aggregated_findings).ok(),
            })
        }
    })
    .await?;
    Ok(Json(response))
}

async fn execute_external(State(state): State<SharedState>, Json(body): Json<ExecuteRequest>) -> Result<Json<PhaseResponse>, ApiError> {
    run_execute(state, body, ExecuteBackend::External).await
}

async fn execute_grounded(State(state): State<SharedState>, Json(body): Json<ExecuteRequest>) -> Result<Json<PhaseResponse>, ApiError> {
    run_execute(state, body, ExecuteBackend::Grounded).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalReportRequest {
    pub topic: String,
    pub plan: String,
    pub findings: String,
    #[serde(default)]
    pub requirement: String,
    #[serde(default)]
    pub request: Option<ResearchRequest>,
}

async fn final_report(State(state): State<SharedState>, Json(body): Json<FinalReportRequest>) -> Result<Json<PhaseResponse>, ApiError> {
    if let Some(request) = &body.request {
        validate_request(request)?;
    }
    let session_id = body.request.as_ref().and_then(|r| r.session_id.clone());
    let response = run_ephemeral(&state, session_id.clone(), |task_id| {
        let state = state.clone();
        async move {
            let output = state
                .engine
                .final_report(FinalReportInput {
                    topic: body.topic.clone(),
                    plan: body.plan.clone(),
                    findings: body.findings.clone(),
                    requirement: body.requirement.clone(),
                })
                .await
                .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;

            if let Some(session_id) = &session_id {
                state
                    .store
                    .save_phase_state(
                        session_id,
                        crate::domain::SessionPhase::Completed,
                        crate::store::PhaseStateUpdate {
                            final_report: Some(output.report.clone()),
                            ..Default::default()
                        },
                        Some(&task_id),
                    )
                    .await
                    .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
            }

            Ok(PhaseResponse {
                task_id,
                status: "completed".to_string(),
                message: "Final report generated".to_string(),
                report: Some(Report::single_section("Final Report", "Final Report", output.report)),
                progress: Some(100),
                websocket_url: None,
                data: None,
            })
        }
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomExportRequest {
    pub topic: String,
    pub markdown_content: String,
    pub slide_titles: Vec<String>,
    #[serde(default)]
    pub request: Option<ResearchRequest>,
}

async fn custom_export(State(state): State<SharedState>, Json(body): Json<CustomExportRequest>) -> Result<Json<PhaseResponse>, ApiError> {
    if let Some(request) = &body.request {
        validate_request(request)?;
    }
    let model = body
        .request
        .as_ref()
        .map(|r| r.models_config.thinking.clone())
        .unwrap_or_default();
    let response = run_ephemeral(&state, None, |task_id| {
        let state = state.clone();
        async move {
            let output = state
                .engine
                .custom_export(CustomExportInput {
                    markdown_content: body.markdown_content.clone(),
                    slide_titles: body.slide_titles.clone(),
                    model,
                })
                .await
                .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;

            let slides_json = serde_json::json!({ "slides": output.slides });
            Ok(PhaseResponse {
                task_id,
                status: "completed".to_string(),
                message: "Export slides generated".to_string(),
                report: Some(Report::single_section(
                    &body.topic,
                    "Slides",
                    serde_json::to_string_pretty(&slides_json).unwrap_or_default(),
                )),
                progress: Some(100),
                websocket_url: None,
                data: Some(slides_json),
            })
        }
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest(pub ResearchRequest);

/// Launches the full {questions → plan → execute → report} pipeline as a
/// background worker and returns immediately. Feedback is implicitly empty
/// (there is no synchronous feedback round-trip in this single-shot entry
/// point — callers that need mid-flight feedback use the individual phase
/// endpoints against a session instead).
async fn start(State(state): State<SharedState>, Json(request): Json<ResearchRequest>) -> Result<Json<PhaseResponse>, ApiError> {
    validate_request(&request)?;

    let session_id = match &request.session_id {
        Some(id) => id.clone(),
        None => {
            let session = state
                .store
                .create(crate::store::CreateSessionRequest {
                    title: request.prompt.chars().take(80).collect(),
                    topic: Some(request.prompt.clone()),
                    research_config: Some(crate::domain::ResearchConfig {
                        thinking_model: request.models_config.thinking.clone(),
                        task_model: request.models_config.task.clone(),
                        enable_web_search: request.enable_web_search,
                        research_depth: request.research_depth.clone(),
                        language: request.language.clone(),
                        output_format: request.output_format.clone(),
                        execution_mode: request.execution_mode.clone(),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
            session.session_id
        }
    };

    let task_id = uuid::Uuid::new_v4().to_string();
    let cancel_flag = state
        .registry
        .create(&task_id, Some(session_id.clone()), false)
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;

    tokio::spawn(run_full_pipeline(state.clone(), task_id.clone(), session_id.clone(), request, cancel_flag));

    Ok(Json(PhaseResponse {
        task_id: task_id.clone(),
        status: "running".to_string(),
        message: "Research task started".to_string(),
        report: None,
        progress: Some(0),
        websocket_url: Some(websocket_url(&task_id)),
        data: Some(serde_json::json!({ "session_id": session_id })),
    }))
}

/// Step percentages {15, 30, 50, 75, 90, 100} mirror the original direct
/// -execution fallback; every value is routed through
/// `pipeline::engine::normalize_progress` before publishing.
async fn run_full_pipeline(
    state: SharedState,
    task_id: String,
    session_id: String,
    request: ResearchRequest,
    cancel_flag: Arc<AtomicBool>,
) {
    use crate::pipeline::engine::normalize_progress;
    use std::sync::atomic::Ordering;

    let registry = state.registry.clone();
    let set_step = |percent: f64, step: &str| {
        registry
            .update(&task_id, |t| {
                t.status = TaskStatus::Running;
                t.progress = normalize_progress(percent);
                t.current_step = step.to_string();
            })
            .ok();
    };

    let result: Result<String, crate::errors::PipelineError> = async {
        set_step(15.0, "Generating questions");
        let questions = state
            .engine
            .questions(QuestionsInput {
                topic: request.prompt.clone(),
                language: request.language.clone(),
                model: request.models_config.thinking.clone(),
            })
            .await?;
        state
            .store
            .save_phase_state(
                &session_id,
                crate::domain::SessionPhase::Questions,
                crate::store::PhaseStateUpdate {
                    topic: Some(request.prompt.clone()),
                    questions: Some(questions.questions.clone()),
                    ..Default::default()
                },
                Some(&task_id),
            )
            .await?;

        if cancel_flag.load(Ordering::SeqCst) {
            return Err(crate::errors::PipelineError::Cancelled);
        }
        set_step(30.0, "Drafting research plan");
        let plan = state
            .engine
            .plan(PlanInput {
                topic: request.prompt.clone(),
                questions: questions.questions.clone(),
                feedback: String::new(),
                language: request.language.clone(),
                model: request.models_config.thinking.clone(),
            })
            .await?;
        state
            .store
            .save_phase_state(
                &session_id,
                crate::domain::SessionPhase::Feedback,
                crate::store::PhaseStateUpdate {
                    report_plan: Some(plan.plan.clone()),
                    ..Default::default()
                },
                Some(&task_id),
            )
            .await?;

        if cancel_flag.load(Ordering::SeqCst) {
            return Err(crate::errors::PipelineError::Cancelled);
        }
        set_step(50.0, "Executing search queries");
        let backend = if request.enable_web_search {
            ExecuteBackend::External
        } else {
            ExecuteBackend::Grounded
        };
        let aggregator = SearchAggregator::new(
            state.search.clone(),
            AggregatorLimits {
                max_query_chars: state.config.max_query_chars,
                max_source_content_chars: state.config.max_source_content_chars,
                max_aggregate_context_chars: state.config.max_aggregate_context_chars,
                default_search_results: request.max_search_results,
            },
        );
        let registry_for_progress = state.registry.clone();
        let progress_task_id = task_id.clone();
        let execute_output = state
            .engine
            .execute(
                ExecuteInput {
                    topic: request.prompt.clone(),
                    plan: plan.plan.clone(),
                    language: request.language.clone(),
                    thinking_model: request.models_config.thinking.clone(),
                    task_model: request.models_config.task.clone(),
                },
                backend,
                Some(&aggregator),
                &cancel_flag,
                move |percent, step| {
                    // EXECUTE's own 0..100 scale is remapped into this
                    // pipeline's 50..90 band so overall progress stays
                    // monotonically non-decreasing end to end.
                    let overall = 50.0 + (percent as f64 / 100.0) * 40.0;
                    registry_for_progress
                        .update(&progress_task_id, |t| {
                            t.progress = normalize_progress(overall);
                            t.current_step = step.to_string();
                        })
                        .ok();
                },
            )
            .await?;
        state
            .store
            .save_phase_state(
                &session_id,
                crate::domain::SessionPhase::Research,
                crate::store::PhaseStateUpdate {
                    search_tasks: Some(execute_output.search_tasks.clone()),
                    ..Default::default()
                },
                Some(&task_id),
            )
            .await?;

        if cancel_flag.load(Ordering::SeqCst) {
            return Err(crate::errors::PipelineError::Cancelled);
        }
        set_step(90.0, "Writing final report");
        let final_report = state
            .engine
            .final_report(FinalReportInput {
                topic: request.prompt.clone(),
                plan: plan.plan.clone(),
                findings: execute_output.aggregated_markdown.clone(),
                requirement: String::new(),
            })
            .await?;
        state
            .store
            .save_phase_state(
                &session_id,
                crate::domain::SessionPhase::Completed,
                crate::store::PhaseStateUpdate {
                    final_report: Some(final_report.report.clone()),
                    ..Default::default()
                },
                Some(&task_id),
            )
            .await?;

        Ok(final_report.report)
    }
    .await;

    match result {
        Ok(report) => {
            registry
                .update(&task_id, |t| {
                    t.progress = 100;
                    t.current_step = "Completed".to_string();
                    t.report = Some(serde_json::json!({ "final_report": report }));
                })
                .ok();
            registry.terminate(&task_id, TaskStatus::Completed).await.ok();
        }
        Err(crate::errors::PipelineError::Cancelled) => {
            registry
                .update(&task_id, |t| t.current_step = "Cancelled by user".to_string())
                .ok();
            registry.terminate(&task_id, TaskStatus::Cancelled).await.ok();
        }
        Err(err) => {
            registry
                .update(&task_id, |t| t.current_step = err.to_string())
                .ok();
            registry.terminate(&task_id, TaskStatus::Failed).await.ok();
        }
    }
}

async fn status(State(state): State<SharedState>, Path(task_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let task = state.registry.get(&task_id).ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;
    Ok(Json(serde_json::json!({
        "task_id": task.task_id,
        "status": task.status,
        "progress": task.progress,
        "current_step": task.current_step,
        "started_at": task.started_at,
        "estimated_completion": task.estimated_completion,
        "tokens_used": task.tokens_used,
        "sources_found": task.sources_found,
        "search_queries_made": task.search_queries_made,
    })))
}

async fn report(State(state): State<SharedState>, Path(task_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let task = state.registry.get(&task_id).ok_or_else(|| ApiError::NotFound(format!("task {task_id} not found")))?;
    task.report
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id} has no report yet")))
}

async fn cancel(State(state): State<SharedState>, Path(task_id): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .registry
        .cancel(&task_id)
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(serde_json::json!({ "task_id": task_id, "status": "cancelling" })))
}

async fn list(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let tasks = state.registry.list();
    Json(serde_json::json!({ "tasks": tasks }))
}

async fn models(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let llm = state.llm.clone();
    let models = state
        .model_catalog
        .get(false, move || async move { llm.list_models().await })
        .await
        .map_err(|e| ApiError::from_kind(e.kind(), e.to_string()))?;
    Ok(Json(serde_json::json!({ "models": models })))
}

trait ErrorMessage {
    fn message(&self) -> String;
}

impl ErrorMessage for ApiError {
    fn message(&self) -> String {
        match self {
            ApiError::Validation(m) | ApiError::NotFound(m) | ApiError::Internal(m) => m.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_router;
    use crate::http::tests::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn sample_request() -> serde_json::Value {
        serde_json::json!({
            "prompt": "What are the tradeoffs between row and column storage?",
            "models_config": {"thinking": "thinking-model", "task": "task-model"},
            "enable_web_search": false,
            "language": "en",
        })
    }

    #[tokio::test]
    async fn questions_rejects_short_prompt() {
        let app = build_router(test_state());
        let mut body = sample_request();
        body["prompt"] = serde_json::json!("short");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/research/questions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn questions_returns_completed_report_for_valid_prompt() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/research/questions")
                    .header("content-type", "application/json")
                    .body(Body::from(sample_request().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json["report"]["sections"][0]["content"].as_str().unwrap().contains("question one"));
    }

    #[tokio::test]
    async fn start_returns_running_with_websocket_url() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/research/start")
                    .header("content-type", "application/json")
                    .body(Body::from(sample_request().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json["websocket_url"].as_str().unwrap().starts_with("/research/ws/"));
    }

    #[tokio::test]
    async fn status_for_unknown_task_is_not_found() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/research/status/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_language_is_rejected() {
        let app = build_router(test_state());
        let mut body = sample_request();
        body["language"] = serde_json::json!("xx");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/research/questions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
