//! Typed error hierarchy for the deep-research core.
//!
//! Each subsystem gets its own enum — `PipelineError`, `StoreError`,
//! `RegistryError`, `SearchAdapterError`, `LlmAdapterError` — rather than one
//! crate-wide enum. Every one of them classifies itself via [`ErrorKind`]
//! so callers that only care about "what HTTP status / ProgressFrame type
//! does this map to" don't need to match on every concrete variant.

use thiserror::Error;

/// The error taxonomy shared across the whole core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreErrorKind {
    Validation,
    NotFound,
    ContextTooLarge,
    UpstreamTimeout,
    UpstreamFailure,
    ParseError,
    Cancelled,
    Internal,
}

pub trait ErrorKind {
    fn kind(&self) -> CoreErrorKind;
}

/// Errors from the web-search adapter.
#[derive(Debug, Error)]
pub enum SearchAdapterError {
    #[error("search request timed out")]
    Timeout,

    #[error("search provider returned an error: {0}")]
    Upstream(String),

    #[error("failed to decode search provider response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ErrorKind for SearchAdapterError {
    fn kind(&self) -> CoreErrorKind {
        match self {
            SearchAdapterError::Timeout => CoreErrorKind::UpstreamTimeout,
            SearchAdapterError::Upstream(_) => CoreErrorKind::UpstreamFailure,
            SearchAdapterError::Decode(_) => CoreErrorKind::UpstreamFailure,
            SearchAdapterError::Other(_) => CoreErrorKind::Internal,
        }
    }
}

/// Errors from the LLM adapter (model invocation, agent/model-catalog caching).
#[derive(Debug, Error)]
pub enum LlmAdapterError {
    #[error("model call timed out")]
    Timeout,

    #[error("model provider returned an error: {0}")]
    Upstream(String),

    #[error("unknown model deployment: {0}")]
    UnknownModel(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ErrorKind for LlmAdapterError {
    fn kind(&self) -> CoreErrorKind {
        match self {
            LlmAdapterError::Timeout => CoreErrorKind::UpstreamTimeout,
            LlmAdapterError::Upstream(_) => CoreErrorKind::UpstreamFailure,
            LlmAdapterError::UnknownModel(_) => CoreErrorKind::Validation,
            LlmAdapterError::Other(_) => CoreErrorKind::Internal,
        }
    }
}

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),

    #[error("failed to read session file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write session file at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize session record: {0}")]
    Codec(#[source] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ErrorKind for StoreError {
    fn kind(&self) -> CoreErrorKind {
        match self {
            StoreError::NotFound(_) => CoreErrorKind::NotFound,
            StoreError::ReadFailed { .. }
            | StoreError::WriteFailed { .. }
            | StoreError::Codec(_)
            | StoreError::Other(_) => CoreErrorKind::Internal,
        }
    }
}

/// Errors from the task registry and broadcaster.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task {0} already exists")]
    AlreadyExists(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ErrorKind for RegistryError {
    fn kind(&self) -> CoreErrorKind {
        match self {
            RegistryError::AlreadyExists(_) => CoreErrorKind::Validation,
            RegistryError::NotFound(_) => CoreErrorKind::NotFound,
            RegistryError::Other(_) => CoreErrorKind::Internal,
        }
    }
}

/// Errors from a single pipeline phase execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(
        "prompt of {chars} characters could not be reduced under the {ceiling} character ceiling"
    )]
    ContextTooLarge { chars: usize, ceiling: usize },

    #[error("upstream call timed out")]
    UpstreamTimeout,

    #[error("upstream call failed: {0}")]
    UpstreamFailure(String),

    #[error("failed to parse model output as JSON: {0}")]
    ParseError(String),

    #[error("task was cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmAdapterError),

    #[error(transparent)]
    Search(#[from] SearchAdapterError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ErrorKind for PipelineError {
    fn kind(&self) -> CoreErrorKind {
        match self {
            PipelineError::Validation(_) => CoreErrorKind::Validation,
            PipelineError::ContextTooLarge { .. } => CoreErrorKind::ContextTooLarge,
            PipelineError::UpstreamTimeout => CoreErrorKind::UpstreamTimeout,
            PipelineError::UpstreamFailure(_) => CoreErrorKind::UpstreamFailure,
            PipelineError::ParseError(_) => CoreErrorKind::ParseError,
            PipelineError::Cancelled => CoreErrorKind::Cancelled,
            PipelineError::Store(e) => e.kind(),
            PipelineError::Llm(e) => e.kind(),
            PipelineError::Search(e) => e.kind(),
            PipelineError::Other(_) => CoreErrorKind::Internal,
        }
    }
}
