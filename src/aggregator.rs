//! Search Aggregator (§4.2): fetches and truncates search results for a
//! single query, producing the numbered context block the Pipeline Engine
//! feeds into synthesis. Partial-failure tolerance across queries is the
//! Pipeline's job (each query's `SearchTask` is isolated there); this module
//! only owns the per-query fetch-and-truncate pipeline.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{Image, Source};
use crate::errors::SearchAdapterError;
use crate::search::SearchAdapter;
use crate::truncate::{truncate_context_share, truncate_query, truncate_source_content};

/// Reserved per source for the `[i] title (url)` metadata prefix when
/// distributing the aggregate context ceiling.
const METADATA_RESERVE_CHARS: usize = 100;

pub struct AggregatorLimits {
    pub max_query_chars: usize,
    pub max_source_content_chars: usize,
    pub max_aggregate_context_chars: usize,
    pub default_search_results: usize,
}

pub struct AggregatedContext {
    /// `[1] title (url)\ncontent\n\n[2] ...`, ready to drop into a synthesis prompt.
    pub numbered_context: String,
    pub sources: Vec<Source>,
    pub images: Vec<Image>,
}

pub struct SearchAggregator {
    adapter: Arc<dyn SearchAdapter>,
    limits: AggregatorLimits,
}

impl SearchAggregator {
    pub fn new(adapter: Arc<dyn SearchAdapter>, limits: AggregatorLimits) -> Self {
        Self { adapter, limits }
    }

    /// Runs the full per-query flow: truncate query, fetch, truncate each
    /// source to the 80 000-char cap, then distribute the 240 000-char
    /// aggregate ceiling evenly across sources and truncate again to each
    /// source's share.
    pub async fn fetch(&self, query: &str) -> Result<AggregatedContext, SearchAdapterError> {
        let truncated_query = truncate_query(query, self.limits.max_query_chars);
        let hit = self
            .adapter
            .search(&truncated_query, self.limits.default_search_results)
            .await?;

        let mut sources = hit.sources;
        for source in &mut sources {
            source.content = truncate_source_content(&source.content, self.limits.max_source_content_chars);
        }

        let numbered_context = self.build_numbered_context(&mut sources);

        Ok(AggregatedContext {
            numbered_context,
            sources,
            images: hit.images,
        })
    }

    /// Distributes the aggregate ceiling evenly across `sources`, in place,
    /// dropping any source whose per-source share would be non-positive
    /// (the ceiling is exhausted) and logging a warning rather than failing
    /// the query.
    fn build_numbered_context(&self, sources: &mut Vec<Source>) -> String {
        let share = if sources.is_empty() {
            0
        } else {
            self.limits.max_aggregate_context_chars / sources.len()
        };
        let per_source_budget = share.saturating_sub(METADATA_RESERVE_CHARS);

        if per_source_budget == 0 && !sources.is_empty() {
            warn!(
                source_count = sources.len(),
                ceiling = self.limits.max_aggregate_context_chars,
                "aggregate context ceiling leaves no room per source; dropping sources past the limit"
            );
            sources.clear();
            return String::new();
        }

        sources
            .iter_mut()
            .enumerate()
            .map(|(i, source)| {
                source.content = truncate_context_share(&source.content, per_source_budget);
                format!("[{}] {} ({})\n{}", i + 1, source.title, source.url, source.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchHit;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeAdapter {
        hit: Mutex<Option<Result<SearchHit, SearchAdapterError>>>,
        last_query: Mutex<Option<String>>,
    }

    impl FakeAdapter {
        fn ok(hit: SearchHit) -> Self {
            Self {
                hit: Mutex::new(Some(Ok(hit))),
                last_query: Mutex::new(None),
            }
        }

        fn err() -> Self {
            Self {
                hit: Mutex::new(Some(Err(SearchAdapterError::Timeout))),
                last_query: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SearchAdapter for FakeAdapter {
        async fn search(&self, query: &str, _max_results: usize) -> Result<SearchHit, SearchAdapterError> {
            *self.last_query.lock().unwrap() = Some(query.to_string());
            self.hit.lock().unwrap().take().expect("search called more than once")
        }
    }

    fn source(title: &str, content: &str) -> Source {
        Source {
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
            content: content.to_string(),
            score: 0.9,
            published_date: None,
        }
    }

    fn limits() -> AggregatorLimits {
        AggregatorLimits {
            max_query_chars: 400,
            max_source_content_chars: 80_000,
            max_aggregate_context_chars: 240_000,
            default_search_results: 5,
        }
    }

    #[tokio::test]
    async fn fetch_numbers_sources_in_returned_order() {
        let hit = SearchHit {
            sources: vec![source("first", "alpha"), source("second", "beta")],
            images: vec![],
        };
        let adapter = Arc::new(FakeAdapter::ok(hit));
        let aggregator = SearchAggregator::new(adapter, limits());
        let result = aggregator.fetch("topic").await.unwrap();
        let first_idx = result.numbered_context.find("[1] first").unwrap();
        let second_idx = result.numbered_context.find("[2] second").unwrap();
        assert!(first_idx < second_idx);
    }

    #[tokio::test]
    async fn fetch_propagates_adapter_errors() {
        let adapter = Arc::new(FakeAdapter::err());
        let aggregator = SearchAggregator::new(adapter, limits());
        let err = aggregator.fetch("topic").await.unwrap_err();
        assert!(matches!(err, SearchAdapterError::Timeout));
    }

    #[tokio::test]
    async fn fetch_truncates_oversized_query_before_calling_adapter() {
        let hit = SearchHit {
            sources: vec![],
            images: vec![],
        };
        let adapter = Arc::new(FakeAdapter::ok(hit));
        let long_query = "word ".repeat(200);
        let aggregator = SearchAggregator::new(adapter.clone(), limits());
        aggregator.fetch(&long_query).await.unwrap();
        let sent = adapter.last_query.lock().unwrap().clone().unwrap();
        assert!(sent.chars().count() <= 400);
    }

    #[test]
    fn build_numbered_context_distributes_ceiling_evenly() {
        let adapter = Arc::new(FakeAdapter::ok(SearchHit {
            sources: vec![],
            images: vec![],
        }));
        let aggregator = SearchAggregator::new(
            adapter,
            AggregatorLimits {
                max_aggregate_context_chars: 1_000,
                ..limits()
            },
        );
        let mut sources = vec![source("a", &"x".repeat(2_000)), source("b", &"y".repeat(2_000))];
        let context = aggregator.build_numbered_context(&mut sources);
        // ceiling 1000 / 2 sources - 100 reserve = 400 chars budget each
        assert!(sources[0].content.chars().count() <= 410);
        assert!(context.contains("[1] a"));
        assert!(context.contains("[2] b"));
    }
}
