use delve_types::ReflectionDecision;
use serde_json::Value;

/// Pull a JSON document out of oracle output that may be wrapped in fences or
/// surrounded by prose. `None` when nothing parses.
pub fn extract_json(text: &str) -> Option<Value> {
    let stripped = delve_sandbox::strip_code_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(stripped.trim()) {
        return Some(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        let (Some(start), Some(end)) = (stripped.find(open), stripped.rfind(close)) else {
            continue;
        };
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&stripped[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Queries from the query-writer output: `{"query": [...]}` or a bare array.
/// Malformed output degrades to the raw topic as the single query.
pub fn parse_query_list(raw: &str, topic: &str, limit: usize) -> Vec<String> {
    let queries = extract_json(raw)
        .and_then(|value| {
            let array = match value {
                Value::Array(items) => items,
                Value::Object(map) => map.get("query")?.as_array()?.clone(),
                _ => return None,
            };
            let queries: Vec<String> = array
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            (!queries.is_empty()).then_some(queries)
        })
        .unwrap_or_else(|| vec![topic.to_string()]);

    queries.into_iter().take(limit.max(1)).collect()
}

/// Reflection output as strict JSON. Unparsable output degrades to the
/// insufficient-with-no-follow-ups decision, which routing then finalizes.
pub fn parse_reflection(raw: &str) -> ReflectionDecision {
    let Some(value) = extract_json(raw) else {
        return ReflectionDecision::default();
    };
    let sufficient = value
        .get("is_sufficient")
        .or_else(|| value.get("sufficient"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let knowledge_gap = value
        .get("knowledge_gap")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let follow_up_queries = value
        .get("follow_up_queries")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    ReflectionDecision {
        sufficient,
        knowledge_gap,
        follow_up_queries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_object_is_extracted() {
        let raw = "```json\n{\"query\": [\"a\", \"b\"]}\n```";
        let queries = parse_query_list(raw, "topic", 5);
        assert_eq!(queries, vec!["a", "b"]);
    }

    #[test]
    fn json_embedded_in_prose_is_extracted() {
        let raw = "Here you go: {\"is_sufficient\": true, \"knowledge_gap\": \"\", \"follow_up_queries\": []} hope that helps";
        let decision = parse_reflection(raw);
        assert!(decision.sufficient);
    }

    #[test]
    fn malformed_query_output_degrades_to_topic() {
        let queries = parse_query_list("sorry, I cannot help", "solar trends", 3);
        assert_eq!(queries, vec!["solar trends"]);
    }

    #[test]
    fn query_count_is_capped() {
        let raw = r#"{"query": ["a", "b", "c", "d"]}"#;
        assert_eq!(parse_query_list(raw, "t", 2).len(), 2);
    }

    #[test]
    fn malformed_reflection_degrades_to_insufficient() {
        let decision = parse_reflection("not json at all");
        assert!(!decision.sufficient);
        assert!(decision.follow_up_queries.is_empty());
    }

    #[test]
    fn bare_query_array_is_accepted() {
        let queries = parse_query_list(r#"["x", "y"]"#, "t", 5);
        assert_eq!(queries, vec!["x", "y"]);
    }
}
