//! Pipeline Engine (§4.1): drives each research phase to a deterministic
//! artifact. Each phase is a pure function of its inputs plus LLM output;
//! state is never hidden between phases beyond what the caller persists to
//! the Session Store.

pub mod engine;
pub mod prompts;

pub use engine::{
    CustomExportInput, CustomExportOutput, ExecuteBackend, ExecuteInput, ExecuteOutput,
    FinalReportInput, FinalReportOutput, PipelineEngine, PlanInput, PlanOutput, QuestionsInput,
    QuestionsOutput, QueryPlanItem, Slide, SlideContent,
};
