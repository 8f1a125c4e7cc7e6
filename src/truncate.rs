//! Length-budget truncation helpers shared by the Pipeline Engine and the
//! Search Aggregator. Each function mirrors one specific truncation stage
//! from `SPEC_FULL.md` §4.1/§4.2 — they intentionally use different
//! boundary characters and different retention thresholds; do not collapse
//! them into one generic "truncate at N%" helper.

/// Truncate `query` to `max_chars`, cutting at the last space if that cut
/// retains at least 80% of `max_chars`; otherwise cut hard with no ellipsis
/// (queries aren't prose, so a trailing marker would just pollute the term).
pub fn truncate_query(query: &str, max_chars: usize) -> String {
    if query.chars().count() <= max_chars {
        return query.to_string();
    }
    let hard_cut = take_chars(query, max_chars);
    match hard_cut.rfind(' ') {
        Some(last_space) if last_space as f64 > max_chars as f64 * 0.8 => {
            hard_cut[..last_space].to_string()
        }
        _ => hard_cut,
    }
}

/// Truncate a single source's content to `max_chars`, cutting at the last
/// `.` if that cut retains at least 90% of `max_chars`; otherwise cut hard
/// and append `"..."`.
pub fn truncate_source_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let hard_cut = take_chars(content, max_chars);
    match hard_cut.rfind('.') {
        Some(last_period) if last_period as f64 > max_chars as f64 * 0.9 => {
            hard_cut[..=last_period].to_string()
        }
        _ => format!("{hard_cut}..."),
    }
}

/// Truncate a source's content to its share of the aggregate context
/// ceiling, cutting at the last `.` or `\n` if that cut retains at least
/// 70% of `max_chars`; otherwise cut hard and append `"..."`.
pub fn truncate_context_share(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let hard_cut = take_chars(content, max_chars);
    let boundary = hard_cut.rfind('.').max(hard_cut.rfind('\n'));
    match boundary {
        Some(idx) if idx as f64 > max_chars as f64 * 0.7 => hard_cut[..=idx].to_string(),
        _ => format!("{hard_cut}..."),
    }
}

/// General-purpose ceiling enforcement for an assembled prompt: reduce
/// `text` so the total prompt (preamble + text) fits under `ceiling`,
/// cutting at a sentence or word boundary while preserving at least 70% of
/// the original text. Returns `None` if the reduction can't hit the target
/// while keeping that much of the original (the phase then fails with
/// `ContextTooLarge`).
pub fn reduce_to_fit(text: &str, target_chars: usize) -> Option<String> {
    let original_len = text.chars().count();
    if original_len <= target_chars {
        return Some(text.to_string());
    }
    let min_retained = (original_len as f64 * 0.7).ceil() as usize;
    if target_chars < min_retained {
        return None;
    }
    let hard_cut = take_chars(text, target_chars);
    let boundary = hard_cut.rfind('.').max(hard_cut.rfind('\n')).max(hard_cut.rfind(' '));
    let reduced = match boundary {
        Some(idx) if idx >= min_retained => hard_cut[..=idx].to_string(),
        _ => hard_cut,
    };
    Some(reduced)
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_query_passes_through_at_exactly_400() {
        let query = "a".repeat(400);
        assert_eq!(truncate_query(&query, 400), query);
    }

    #[test]
    fn truncate_query_cuts_at_word_boundary_past_401() {
        let mut query = "word ".repeat(90); // well past 400 chars with spaces
        query.push_str("tail");
        let truncated = truncate_query(&query, 400);
        assert!(truncated.chars().count() <= 400);
        assert!(!truncated.ends_with("wor"));
    }

    #[test]
    fn truncate_query_hard_cuts_when_no_space_found() {
        let query = "a".repeat(500);
        let truncated = truncate_query(&query, 400);
        assert_eq!(truncated.chars().count(), 400);
    }

    #[test]
    fn truncate_source_content_passes_through_at_exactly_80000() {
        let content = "a".repeat(80_000);
        assert_eq!(truncate_source_content(&content, 80_000), content);
    }

    #[test]
    fn truncate_source_content_appends_ellipsis_past_80000() {
        let content = "a".repeat(80_001);
        let truncated = truncate_source_content(&content, 80_000);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_source_content_cuts_at_sentence_boundary_when_above_threshold() {
        let mut content = "x".repeat(75_000);
        content.push('.');
        content.push_str(&"y".repeat(10_000));
        let truncated = truncate_source_content(&content, 80_000);
        assert!(truncated.ends_with('.'));
        assert!(!truncated.ends_with("..."));
    }

    #[test]
    fn reduce_to_fit_returns_none_when_target_below_70_percent_retention() {
        let text = "a".repeat(1000);
        assert!(reduce_to_fit(&text, 500).is_none());
    }

    #[test]
    fn reduce_to_fit_keeps_whole_text_when_already_under_target() {
        let text = "short text";
        assert_eq!(reduce_to_fit(text, 1000).unwrap(), text);
    }
}
