use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aggregator::SearchAggregator;
use crate::domain::{Image, SearchTask, SearchTaskState, Source};
use crate::errors::PipelineError;
use crate::llm::{GenerateRequest, LlmAdapter};
use crate::truncate::reduce_to_fit;

use super::prompts;

const QUESTIONS_MAX_TOKENS: u32 = 2048;
const PLAN_MAX_TOKENS: u32 = 3072;
const QUERY_GEN_MAX_TOKENS: u32 = 4096;
const SYNTHESIS_MAX_TOKENS: u32 = 4096;
const FINAL_REPORT_MAX_TOKENS: u32 = 8192;
const CUSTOM_EXPORT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Normalizes a raw progress value (which the original source sometimes
/// expressed as a fraction like `0.9` and sometimes as a whole percentage)
/// to an integer in `[0, 100]`, rounding half away from zero. Every
/// `on_progress` call in this module routes through this so the boundary
/// rule holds regardless of which phase or call site produced the value.
pub fn normalize_progress(value: f64) -> u8 {
    let clamped = value.clamp(0.0, 100.0);
    let rounded = if clamped >= 0.0 {
        (clamped + 0.5).floor()
    } else {
        (clamped - 0.5).ceil()
    };
    rounded as u8
}

pub struct QuestionsInput {
    pub topic: String,
    pub language: String,
    pub model: String,
}

pub struct QuestionsOutput {
    pub questions: Vec<String>,
    pub tokens_used: u64,
}

pub struct PlanInput {
    pub topic: String,
    pub questions: Vec<String>,
    pub feedback: String,
    pub language: String,
    pub model: String,
}

pub struct PlanOutput {
    pub plan: String,
    pub tokens_used: u64,
}

/// One element of the strict-JSON query plan the thinking model returns
/// during EXECUTE's query-generation sub-step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlanItem {
    pub query: String,
    #[serde(rename = "researchGoal")]
    pub research_goal: String,
}

pub enum ExecuteBackend {
    /// The thinking model is configured with a web-grounding tool and
    /// performs the search itself.
    Grounded,
    /// The Search Aggregator fetches pages through a web-search adapter and
    /// the task model synthesizes learnings with citation markers.
    External,
}

pub struct ExecuteInput {
    pub topic: String,
    pub plan: String,
    pub language: String,
    pub thinking_model: String,
    pub task_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedFinding {
    pub query: String,
    pub research_goal: String,
    pub findings: String,
    pub query_number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_count: Option<usize>,
}

pub struct ExecuteOutput {
    pub aggregated_markdown: String,
    pub aggregated_findings: Vec<AggregatedFinding>,
    pub search_tasks: Vec<SearchTask>,
    pub tokens_used: u64,
}

pub struct FinalReportInput {
    pub topic: String,
    pub plan: String,
    pub findings: String,
    pub requirement: String,
}

pub struct FinalReportOutput {
    pub report: String,
    pub tokens_used: u64,
}

pub struct CustomExportInput {
    pub markdown_content: String,
    pub slide_titles: Vec<String>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlideContent {
    Bullets(Vec<String>),
    Swot {
        #[serde(rename = "Strengths", default)]
        strengths: Vec<String>,
        #[serde(rename = "Weaknesses", default)]
        weaknesses: Vec<String>,
        #[serde(rename = "Opportunities", default)]
        opportunities: Vec<String>,
        #[serde(rename = "Risks", default)]
        risks: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    pub title: String,
    pub content: SlideContent,
}

pub struct CustomExportOutput {
    pub slides: Vec<Slide>,
}

const MISSING_SLIDE_CONTENT: &str = "Content unavailable in provided Markdown.";

/// Drives the QUESTIONS, PLAN, EXECUTE, FINAL REPORT, and CUSTOM EXPORT
/// phases. Holds no task state of its own — callers (the HTTP wiring layer,
/// via the Task Registry) own progress reporting and persistence.
pub struct PipelineEngine {
    llm: Arc<dyn LlmAdapter>,
    max_total_prompt_chars: usize,
}

impl PipelineEngine {
    pub fn new(llm: Arc<dyn LlmAdapter>, max_total_prompt_chars: usize) -> Self {
        Self {
            llm,
            max_total_prompt_chars,
        }
    }

    /// Enforces the 250 000-character total-prompt ceiling by reducing
    /// `user_content` (preserving ≥ 70% of it) if the preamble plus content
    /// would exceed it.
    fn fit_user_content(&self, user_content: &str) -> Result<String, PipelineError> {
        let preamble_len = prompts::system_preamble().chars().count();
        let total = preamble_len + user_content.chars().count();
        if total <= self.max_total_prompt_chars {
            return Ok(user_content.to_string());
        }
        let target = self.max_total_prompt_chars.saturating_sub(preamble_len);
        reduce_to_fit(user_content, target).ok_or(PipelineError::ContextTooLarge {
            chars: total,
            ceiling: self.max_total_prompt_chars,
        })
    }

    pub async fn questions(&self, input: QuestionsInput) -> Result<QuestionsOutput, PipelineError> {
        if input.topic.trim().is_empty() {
            return Err(PipelineError::Validation("topic must not be empty".to_string()));
        }
        let prompt = self.fit_user_content(&prompts::questions_prompt(&input.topic, &input.language))?;
        let response = self
            .llm
            .generate(GenerateRequest {
                system_prompt: prompts::system_preamble(),
                prompt,
                model: input.model,
                agent_name: "questions".to_string(),
                max_tokens: QUESTIONS_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                grounding: false,
            })
            .await?;
        let questions = parse_numbered_list(&response.text);
        Ok(QuestionsOutput {
            questions,
            tokens_used: response.tokens_used,
        })
    }

    pub async fn plan(&self, input: PlanInput) -> Result<PlanOutput, PipelineError> {
        let prompt = self.fit_user_content(&prompts::plan_prompt(
            &input.topic,
            &input.questions,
            &input.feedback,
            &input.language,
        ))?;
        let response = self
            .llm
            .generate(GenerateRequest {
                system_prompt: prompts::system_preamble(),
                prompt,
                model: input.model,
                agent_name: "plan".to_string(),
                max_tokens: PLAN_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                grounding: false,
            })
            .await?;
        Ok(PlanOutput {
            plan: response.text,
            tokens_used: response.tokens_used,
        })
    }

    /// Query generation sub-step: parses the model's strict-JSON response,
    /// stripping a ```json fence if present. On any parse failure falls back
    /// to a single-element plan rather than discarding the response.
    async fn generate_query_plan(&self, plan: &str, topic: &str, model: &str) -> Result<(Vec<QueryPlanItem>, u64), PipelineError> {
        let prompt = self.fit_user_content(&prompts::query_generation_prompt(plan))?;
        let response = self
            .llm
            .generate(GenerateRequest {
                system_prompt: prompts::system_preamble(),
                prompt,
                model: model.to_string(),
                agent_name: "query-generation".to_string(),
                max_tokens: QUERY_GEN_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                grounding: false,
            })
            .await?;
        Ok((parse_query_plan(&response.text, topic), response.tokens_used))
    }

    /// EXECUTE phase. `on_progress` is called with a normalized percentage
    /// and a short step description at each boundary: 0 on start, 10 once
    /// query generation completes, linear up to 90 across queries, 100 once
    /// aggregation is assembled.
    pub async fn execute(
        &self,
        input: ExecuteInput,
        backend: ExecuteBackend,
        aggregator: Option<&SearchAggregator>,
        cancel: &AtomicBool,
        mut on_progress: impl FnMut(u8, &str),
    ) -> Result<ExecuteOutput, PipelineError> {
        on_progress(normalize_progress(0.0), "Starting research execution");

        let (query_plan, mut tokens_used) = self
            .generate_query_plan(&input.plan, &input.topic, &input.thinking_model)
            .await?;
        on_progress(normalize_progress(10.0), "Query plan generated");

        if matches!(backend, ExecuteBackend::External) && aggregator.is_none() {
            return Err(PipelineError::Validation(
                "external execution backend requires a search aggregator".to_string(),
            ));
        }

        let total = query_plan.len().max(1);
        let mut search_tasks = Vec::with_capacity(query_plan.len());
        let mut aggregated_findings = Vec::with_capacity(query_plan.len());

        for (i, item) in query_plan.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::Cancelled);
            }

            let outcome = match backend {
                ExecuteBackend::Grounded => self.run_grounded_query(item, &input).await,
                ExecuteBackend::External => {
                    self.run_external_query(item, &input, aggregator.expect("checked above"))
                        .await
                }
            };

            match outcome {
                Ok((task, sources_count, task_tokens)) => {
                    tokens_used += task_tokens;
                    aggregated_findings.push(AggregatedFinding {
                        query: item.query.clone(),
                        research_goal: item.research_goal.clone(),
                        findings: task.learning.clone(),
                        query_number: i + 1,
                        sources_count,
                    });
                    search_tasks.push(task);
                }
                Err(message) => {
                    let prefix = match backend {
                        ExecuteBackend::Grounded => "Error executing query",
                        ExecuteBackend::External => "Error executing Tavily search",
                    };
                    let learning = format!("{prefix}: {message}");
                    aggregated_findings.push(AggregatedFinding {
                        query: item.query.clone(),
                        research_goal: item.research_goal.clone(),
                        findings: learning.clone(),
                        query_number: i + 1,
                        sources_count: None,
                    });
                    search_tasks.push(SearchTask::failed(item.query.clone(), item.research_goal.clone(), learning));
                }
            }

            let completed = (i + 1) as f64;
            let percent = 10.0 + (completed / total as f64) * 80.0;
            on_progress(normalize_progress(percent), "Executing search queries");
        }

        let aggregated_markdown = render_aggregation_markdown(&aggregated_findings);
        on_progress(normalize_progress(100.0), "Research execution complete");

        Ok(ExecuteOutput {
            aggregated_markdown,
            aggregated_findings,
            search_tasks,
            tokens_used,
        })
    }

    async fn run_external_query(
        &self,
        item: &QueryPlanItem,
        input: &ExecuteInput,
        aggregator: &SearchAggregator,
    ) -> Result<(SearchTask, Option<usize>, u64), String> {
        let context = aggregator.fetch(&item.query).await.map_err(|e| e.to_string())?;
        let sources_count = context.sources.len();
        let prompt = prompts::synthesis_prompt(&item.query, &item.research_goal, &context.numbered_context, &input.language);
        let fitted = self.fit_user_content(&prompt).map_err(|e| e.to_string())?;
        let response = self
            .llm
            .generate(GenerateRequest {
                system_prompt: prompts::system_preamble(),
                prompt: fitted,
                model: input.task_model.clone(),
                agent_name: "synthesis".to_string(),
                max_tokens: SYNTHESIS_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                grounding: false,
            })
            .await
            .map_err(|e| e.to_string())?;

        let task = SearchTask {
            query: item.query.clone(),
            research_goal: item.research_goal.clone(),
            state: SearchTaskState::Completed,
            learning: response.text,
            sources: context.sources,
            images: context.images,
        };
        Ok((task, Some(sources_count), response.tokens_used))
    }

    async fn run_grounded_query(
        &self,
        item: &QueryPlanItem,
        input: &ExecuteInput,
    ) -> Result<(SearchTask, Option<usize>, u64), String> {
        let prompt = prompts::synthesis_prompt(
            &item.query,
            &item.research_goal,
            "(the model performs web grounding directly; no pre-fetched context is supplied)",
            &input.language,
        );
        let response = self
            .llm
            .generate(GenerateRequest {
                system_prompt: prompts::system_preamble(),
                prompt,
                model: input.thinking_model.clone(),
                agent_name: "grounded-synthesis".to_string(),
                max_tokens: SYNTHESIS_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                grounding: true,
            })
            .await
            .map_err(|e| e.to_string())?;

        let task = SearchTask {
            query: item.query.clone(),
            research_goal: item.research_goal.clone(),
            state: SearchTaskState::Completed,
            learning: response.text,
            sources: Vec::<Source>::new(),
            images: Vec::<Image>::new(),
        };
        Ok((task, None, response.tokens_used))
    }

    pub async fn final_report(&self, input: FinalReportInput) -> Result<FinalReportOutput, PipelineError> {
        let prompt = self.fit_user_content(&prompts::final_report_prompt(
            &input.topic,
            &input.plan,
            &input.findings,
            &input.requirement,
        ))?;
        let response = self
            .llm
            .generate(GenerateRequest {
                system_prompt: prompts::system_preamble(),
                prompt,
                model: String::new(),
                agent_name: "final-report".to_string(),
                max_tokens: FINAL_REPORT_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                grounding: false,
            })
            .await?;
        Ok(FinalReportOutput {
            report: response.text,
            tokens_used: response.tokens_used,
        })
    }

    /// CUSTOM EXPORT phase. Re-orders the model's slide array to match
    /// `input.slide_titles` exactly and substitutes the literal fallback
    /// content for any title the model omitted, rather than trusting
    /// model-authored ordering.
    pub async fn custom_export(&self, input: CustomExportInput) -> Result<CustomExportOutput, PipelineError> {
        let prompt = self.fit_user_content(&prompts::custom_export_prompt(&input.markdown_content, &input.slide_titles))?;
        let response = self
            .llm
            .generate(GenerateRequest {
                system_prompt: prompts::system_preamble(),
                prompt,
                model: input.model,
                agent_name: "custom-export".to_string(),
                max_tokens: CUSTOM_EXPORT_MAX_TOKENS,
                temperature: DEFAULT_TEMPERATURE,
                grounding: false,
            })
            .await?;

        let model_slides = parse_slides(&response.text)?;
        let slides = input
            .slide_titles
            .iter()
            .map(|title| {
                model_slides
                    .iter()
                    .find(|s| &s.title == title)
                    .cloned()
                    .unwrap_or_else(|| Slide {
                        title: title.clone(),
                        content: SlideContent::Bullets(vec![MISSING_SLIDE_CONTENT.to_string()]),
                    })
            })
            .collect();

        Ok(CustomExportOutput { slides })
    }
}

fn parse_numbered_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let without_number = trimmed.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == ' ');
            if without_number.is_empty() {
                None
            } else {
                Some(without_number.to_string())
            }
        })
        .collect()
}

fn strip_json_fence(text: &str) -> String {
    let trimmed = text.trim();
    let without_prefix = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_prefix.trim_end_matches("```").trim().to_string()
}

fn parse_query_plan(text: &str, topic: &str) -> Vec<QueryPlanItem> {
    let stripped = strip_json_fence(text);
    match serde_json::from_str::<Vec<QueryPlanItem>>(&stripped) {
        Ok(items) if !items.is_empty() => items,
        _ => vec![QueryPlanItem {
            query: topic.to_string(),
            research_goal: "General research".to_string(),
        }],
    }
}

#[derive(Deserialize)]
struct SlidesEnvelope {
    slides: Vec<Slide>,
}

fn parse_slides(text: &str) -> Result<Vec<Slide>, PipelineError> {
    let stripped = strip_json_fence(text);
    let envelope: SlidesEnvelope =
        serde_json::from_str(&stripped).map_err(|e| PipelineError::ParseError(e.to_string()))?;
    Ok(envelope.slides)
}

fn render_aggregation_markdown(findings: &[AggregatedFinding]) -> String {
    let mut out = String::from("# Research Execution Results\n\n");
    for finding in findings {
        out.push_str(&format!(
            "## Query {}: {}\n\n**Research goal:** {}\n\n**Sources found:** {}\n\n{}\n\n",
            finding.query_number,
            finding.query,
            finding.research_goal,
            finding.sources_count.map(|c| c.to_string()).unwrap_or_else(|| "n/a".to_string()),
            finding.findings
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LlmAdapterError;
    use crate::llm::{GenerateResponse, ModelInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeLlm {
        responses: Mutex<Vec<String>>,
    }

    impl FakeLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl LlmAdapter for FakeLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, LlmAdapterError> {
            let text = self.responses.lock().unwrap().pop().expect("no more canned responses");
            Ok(GenerateResponse {
                text,
                tokens_used: 100,
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmAdapterError> {
            Ok(vec![])
        }
    }

    fn engine(llm: FakeLlm) -> PipelineEngine {
        PipelineEngine::new(Arc::new(llm), 250_000)
    }

    #[test]
    fn normalize_progress_rounds_half_away_from_zero() {
        assert_eq!(normalize_progress(89.5), 90);
        assert_eq!(normalize_progress(0.9 * 100.0), 90);
        assert_eq!(normalize_progress(150.0), 100);
        assert_eq!(normalize_progress(-10.0), 0);
    }

    #[tokio::test]
    async fn questions_rejects_empty_topic() {
        let engine = engine(FakeLlm::new(vec![]));
        let err = engine
            .questions(QuestionsInput {
                topic: "   ".to_string(),
                language: "en".to_string(),
                model: "thinking".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn questions_parses_numbered_response_into_list() {
        let engine = engine(FakeLlm::new(vec!["1. What is the budget?\n2. Who is the audience?"]));
        let output = engine
            .questions(QuestionsInput {
                topic: "storage engines".to_string(),
                language: "en".to_string(),
                model: "thinking".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(output.questions.len(), 2);
        assert!(output.questions[0].contains("budget"));
    }

    #[test]
    fn parse_query_plan_strips_json_fence() {
        let text = "```json\n[{\"query\": \"q1\", \"researchGoal\": \"g1\"}]\n```";
        let items = parse_query_plan(text, "fallback");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].query, "q1");
    }

    #[test]
    fn parse_query_plan_falls_back_on_invalid_json() {
        let items = parse_query_plan("not json at all", "fallback topic");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].query, "fallback topic");
        assert_eq!(items[0].research_goal, "General research");
    }

    #[tokio::test]
    async fn execute_cancels_before_starting_any_query() {
        let engine = engine(FakeLlm::new(vec!["[{\"query\": \"q1\", \"researchGoal\": \"g1\"}]"]));
        let cancel = AtomicBool::new(true);
        let err = engine
            .execute(
                ExecuteInput {
                    topic: "topic".to_string(),
                    plan: "plan".to_string(),
                    language: "en".to_string(),
                    thinking_model: "thinking".to_string(),
                    task_model: "task".to_string(),
                },
                ExecuteBackend::Grounded,
                None,
                &cancel,
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn execute_grounded_backend_produces_one_search_task_per_query() {
        let engine = engine(FakeLlm::new(vec![
            "[{\"query\": \"q1\", \"researchGoal\": \"g1\"}, {\"query\": \"q2\", \"researchGoal\": \"g2\"}]",
            "learning one",
            "learning two",
        ]));
        let cancel = AtomicBool::new(false);
        let mut progress_log = Vec::new();
        let output = engine
            .execute(
                ExecuteInput {
                    topic: "topic".to_string(),
                    plan: "plan".to_string(),
                    language: "en".to_string(),
                    thinking_model: "thinking".to_string(),
                    task_model: "task".to_string(),
                },
                ExecuteBackend::Grounded,
                None,
                &cancel,
                |p, _| progress_log.push(p),
            )
            .await
            .unwrap();
        assert_eq!(output.search_tasks.len(), 2);
        assert_eq!(output.aggregated_findings.len(), 2);
        assert_eq!(progress_log.first().copied(), Some(0));
        assert_eq!(progress_log.last().copied(), Some(100));
        assert!(progress_log.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn custom_export_substitutes_fallback_for_missing_slide() {
        let model_slides = vec![Slide {
            title: "Company Snapshot".to_string(),
            content: SlideContent::Bullets(vec!["founded 2020".to_string()]),
        }];
        let requested = ["Company Snapshot".to_string(), "Considerations".to_string()];
        let resolved: Vec<Slide> = requested
            .iter()
            .map(|title| {
                model_slides
                    .iter()
                    .find(|s| &s.title == title)
                    .cloned()
                    .unwrap_or_else(|| Slide {
                        title: title.clone(),
                        content: SlideContent::Bullets(vec![MISSING_SLIDE_CONTENT.to_string()]),
                    })
            })
            .collect();
        assert_eq!(resolved[0].title, "Company Snapshot");
        assert_eq!(resolved[1].title, "Considerations");
        match &resolved[1].content {
            SlideContent::Bullets(bullets) => assert_eq!(bullets[0], MISSING_SLIDE_CONTENT),
            _ => panic!("expected fallback bullets"),
        }
    }
}
