//! Search Adapter (§4.6): a uniform `search` surface over an external
//! provider, with a sliding-window rate limiter shared across callers.

mod rate_limiter;
mod tavily;

pub use rate_limiter::RateLimiter;
pub use tavily::TavilySearchAdapter;

use async_trait::async_trait;

use crate::domain::{Image, Source};
use crate::errors::SearchAdapterError;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub sources: Vec<Source>,
    pub images: Vec<Image>,
}

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    /// Returns whatever raw results the provider yields, unmodified in
    /// length — truncation and context-budgeting are the Aggregator's job.
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchHit, SearchAdapterError>;
}
