use delve_providers::SearchHit;

/// Stage prompts. Every prompt carries the current date so the oracle biases
/// toward fresh material.
pub fn current_date() -> String {
    chrono::Utc::now().format("%B %d, %Y").to_string()
}

pub fn query_writer_prompt(topic: &str, count: usize, date: &str) -> String {
    format!(
        r#"You write precise web-search queries for an automated research tool.

Guidelines:
- Prefer fewer queries; add more only when the request contains distinct sub-questions.
- Each query isolates one facet of the request. Never exceed {count} queries.
- Avoid near-duplicate wording.
- Bias toward recent information; the current date is {date}.

Return a JSON object with exactly these keys:
- "rationale": one sentence on why these queries cover the request.
- "query": a list of the query strings.

Research topic: {topic}"#
    )
}

pub fn web_searcher_prompt(query: &str, hits: &[SearchHit], date: &str) -> String {
    let mut material = String::new();
    for hit in hits {
        material.push_str(&format!(
            "Source: {} ({})\n{}\n\n",
            hit.title,
            hit.url,
            if hit.content.is_empty() {
                &hit.snippet
            } else {
                &hit.content
            }
        ));
    }
    format!(
        r#"Synthesize the search results below into a verifiable research summary for the query "{query}".

Instructions:
- Consolidate key findings and keep track of which source each fact came from.
- Only include information found in the results; invent nothing.
- The current date is {date}.

Search results:
{material}"#
    )
}

pub fn reflection_prompt(topic: &str, summaries: &str) -> String {
    format!(
        r#"You audit research summaries gathered about "{topic}".

Steps:
1. Identify hard knowledge gaps: missing metrics, unclear mechanisms, outdated figures.
2. Decide whether the summaries already suffice to answer the question.
3. If not, write self-contained follow-up search queries focused on the gap.

Output strict JSON:
{{
  "is_sufficient": true or false,
  "knowledge_gap": "<short description or empty string>",
  "follow_up_queries": ["<query>", ...]
}}

Summaries:
{summaries}"#
    )
}

pub fn answer_prompt(topic: &str, summaries: &str, date: &str) -> String {
    format!(
        r#"Produce the final answer to the user's research question from the supplied summaries.

Requirements:
- Draw exclusively from the summaries below.
- Be direct, thorough, and relevant to the original question.
- Do not describe the research process itself.

Question: {topic}
Current date: {date}

Source material:
{summaries}"#
    )
}

pub fn code_writer_prompt(topic: &str, summaries: &str) -> String {
    format!(
        r#"Write a single self-contained Python script that performs the quantitative analysis needed for "{topic}".

Requirements:
- Use only pandas, numpy, and matplotlib.
- Embed any needed figures from the research material as literals in the script.
- Print the key results. Call plt.show() for any chart.
- Output only Python code, no explanations.

Research material:
{summaries}"#
    )
}

/// Research summaries as one block, separated the way downstream prompts
/// expect.
pub fn join_summaries(summaries: &[&str]) -> String {
    summaries.join("\n---\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_carry_topic_and_date() {
        let prompt = query_writer_prompt("solar capacity trends", 3, "August 25, 2026");
        assert!(prompt.contains("solar capacity trends"));
        assert!(prompt.contains("August 25, 2026"));
        assert!(prompt.contains("3 queries"));
    }

    #[test]
    fn summaries_join_with_separators() {
        let joined = join_summaries(&["one", "two", "three"]);
        assert_eq!(joined, "one\n---\ntwo\n---\nthree");
    }

    #[test]
    fn searcher_prompt_prefers_full_content_over_snippet() {
        let hits = vec![SearchHit {
            title: "T".to_string(),
            url: "https://example.com".to_string(),
            snippet: "short".to_string(),
            content: "full text".to_string(),
        }];
        let prompt = web_searcher_prompt("q", &hits, "date");
        assert!(prompt.contains("full text"));
        assert!(!prompt.contains("\nshort\n"));
    }
}
