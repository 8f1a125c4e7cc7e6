//! Prompt assembly for each phase. Every phase shares the system preamble;
//! the user-facing template is phase-specific.

use chrono::Utc;

/// Shared system preamble, injected with today's date. Every phase uses
/// the same one — the engine never customizes it per phase.
pub fn system_preamble() -> String {
    format!(
        "You are an expert researcher. Today is {}. Follow these instructions when responding:\n\n\
        - You may be asked to research subjects that are after your knowledge cutoff; assume the user is right when presented with news.\n\
        - The user is a highly experienced analyst — no need to simplify, be as detailed and accurate as possible.\n\
        - Be highly organized and proactive; suggest angles the user may not have considered.\n\
        - Value good arguments over authority; the source of a claim is irrelevant next to its soundness.\n\
        - You may use speculation or prediction when useful, but flag it clearly.",
        Utc::now().format("%Y-%m-%d")
    )
}

pub fn questions_prompt(topic: &str, language: &str) -> String {
    format!(
        "<QUERY>\n{topic}\n</QUERY>\n\n\
        Ask at least five follow-up questions that would sharpen the scope of this research topic. \
        Number them. Respond in the same language as the user's language ({language}).",
    )
}

pub fn plan_prompt(topic: &str, questions: &[String], feedback: &str, language: &str) -> String {
    let numbered_questions = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {q}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<QUERY>\n\
        Initial Query: {topic}\n\n\
        Follow-up Questions:\n{numbered_questions}\n\n\
        Follow-up Feedback: {feedback}\n\
        </QUERY>\n\n\
        <GUIDELINES>\n\
        Produce a research plan with distinct, non-overlapping sections. Each section must have a \
        one-sentence summary of its purpose. No two sections should cover the same ground.\n\
        </GUIDELINES>\n\n\
        Respond in the same language as the user's language ({language}).",
    )
}

/// Instructs the model to return a strict JSON array of `{query, researchGoal}`.
pub fn query_generation_prompt(plan: &str) -> String {
    format!(
        "<PLAN>\n{plan}\n</PLAN>\n\n\
        Based on this plan, generate a list of search queries to execute. Respond with a strict JSON \
        array matching this schema, and nothing else:\n\n\
        [{{\"query\": \"string\", \"researchGoal\": \"string\"}}]",
    )
}

pub fn synthesis_prompt(query: &str, research_goal: &str, numbered_context: &str, language: &str) -> String {
    format!(
        "<QUERY>\n{query}\n</QUERY>\n\n\
        <RESEARCH_GOAL>\n{research_goal}\n</RESEARCH_GOAL>\n\n\
        <CONTEXT>\n{numbered_context}\n</CONTEXT>\n\n\
        Using only the numbered context above, produce dense, information-rich learnings that answer \
        the research goal. Cite sources inline with `[n]` markers keyed to the numbered context; you \
        may cite multiple sources for one claim (e.g. `[1][2]`). Respond in the same language as the \
        user's language ({language}).",
    )
}

pub fn final_report_prompt(topic: &str, plan: &str, findings: &str, requirement: &str) -> String {
    format!(
        "<PLAN>\n{plan}\n</PLAN>\n\n\
        <LEARNINGS>\n{findings}\n</LEARNINGS>\n\n\
        <REQUIREMENT>\n{requirement}\n</REQUIREMENT>\n\n\
        <QUERY>\n{topic}\n</QUERY>\n\n\
        Write the final research report in Markdown. Include ALL the learnings from the research above \
        — do not summarize them away. Aim for 5 pages or more of substantive content. Respond only with \
        the final report content, and no additional text before or after.",
    )
}

pub fn custom_export_prompt(markdown_content: &str, slide_titles: &[String]) -> String {
    let titles = slide_titles
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {t}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<REPORT>\n{markdown_content}\n</REPORT>\n\n\
        <SLIDE_TITLES>\n{titles}\n</SLIDE_TITLES>\n\n\
        Produce a strict JSON object matching this schema, and nothing else:\n\n\
        {{\"slides\": [{{\"title\": \"string\", \"content\": [\"string\", ...] | {{\"Strengths\": [...], \"Weaknesses\": [...], \"Opportunities\": [...], \"Risks\": [...]}}}}]}}\n\n\
        Use the `content` mapping form (Strengths/Weaknesses/Opportunities/Risks) only for SWOT-style \
        slides such as \"Considerations\"; every other slide uses an ordered array of short bullets. \
        Emit exactly one slide per title above, in the same order.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_preamble_mentions_todays_date() {
        let preamble = system_preamble();
        let year = Utc::now().format("%Y").to_string();
        assert!(preamble.contains(&year));
    }

    #[test]
    fn plan_prompt_numbers_questions_starting_at_one() {
        let prompt = plan_prompt(
            "topic",
            &["first question".to_string(), "second question".to_string()],
            "feedback",
            "en",
        );
        assert!(prompt.contains("1. first question"));
        assert!(prompt.contains("2. second question"));
    }

    #[test]
    fn custom_export_prompt_lists_titles_in_order() {
        let prompt = custom_export_prompt(
            "# Report",
            &["Company Snapshot".to_string(), "Considerations".to_string()],
        );
        let snapshot_idx = prompt.find("Company Snapshot").unwrap();
        let considerations_idx = prompt.find("Considerations").unwrap();
        assert!(snapshot_idx < considerations_idx);
    }
}
