use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::ExecutionResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The unit dispatched to one research fan-out branch. Immutable once built;
/// sequence ids continue across loop iterations and are never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchUnit {
    pub query: String,
    pub sequence_id: usize,
}

impl SearchUnit {
    pub fn new(query: impl Into<String>, sequence_id: usize) -> Self {
        Self {
            query: query.into(),
            sequence_id,
        }
    }
}

/// Produced once per reflection pass and consumed immediately by routing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReflectionDecision {
    pub sufficient: bool,
    #[serde(default)]
    pub knowledge_gap: String,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// One research branch outcome. `degraded` marks branches where the provider
/// failed or returned nothing; the slot is still filled so the query/result
/// length invariant holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub query: String,
    pub sequence_id: usize,
    pub summary: String,
    pub source_count: usize,
    pub degraded: bool,
}

impl ResearchRecord {
    pub fn degraded(query: impl Into<String>, sequence_id: usize) -> Self {
        Self {
            query: query.into(),
            sequence_id,
            summary: String::new(),
            source_count: 0,
            degraded: true,
        }
    }
}

/// The single mutable record threaded through the stage graph. Owned by the
/// orchestrator; mutated only by applying `StageUpdate`s; discarded once the
/// report is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub request_id: String,
    pub topic: String,
    pub messages: Vec<ChatTurn>,
    pub executed_queries: Vec<String>,
    pub research_results: Vec<ResearchRecord>,
    pub sources: Vec<SourceRef>,
    pub loop_count: u32,
    pub sufficient: bool,
    pub follow_up_queries: Vec<String>,
    pub code_needed: bool,
    pub generated_code: String,
    pub execution_results: Vec<ExecutionResult>,
    pub final_report: String,
}

impl WorkflowState {
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            request_id: Uuid::new_v4().to_string(),
            messages: vec![ChatTurn::user(topic.clone())],
            topic,
            executed_queries: Vec::new(),
            research_results: Vec::new(),
            sources: Vec::new(),
            loop_count: 0,
            sufficient: false,
            follow_up_queries: Vec::new(),
            code_needed: false,
            generated_code: String::new(),
            execution_results: Vec::new(),
            final_report: String::new(),
        }
    }

    /// Merge one stage's partial output. Append-only lists extend, scalars
    /// are last-write-wins, sources deduplicate by URL.
    pub fn apply(&mut self, update: StageUpdate) {
        self.messages.extend(update.messages);
        for (query, record) in update.research.into_iter() {
            self.executed_queries.push(query);
            self.research_results.push(record);
        }
        for source in update.sources {
            if !self.sources.iter().any(|s| s.url == source.url) {
                self.sources.push(source);
            }
        }
        self.execution_results.extend(update.execution_results);
        if let Some(count) = update.loop_count {
            self.loop_count = count;
        }
        if let Some(sufficient) = update.sufficient {
            self.sufficient = sufficient;
        }
        if let Some(follow_ups) = update.follow_up_queries {
            self.follow_up_queries = follow_ups;
        }
        if let Some(code_needed) = update.code_needed {
            self.code_needed = code_needed;
        }
        if let Some(code) = update.generated_code {
            self.generated_code = code;
        }
        if let Some(report) = update.final_report {
            self.final_report = report;
        }
    }

    /// Summaries of every non-degraded research branch, in completion order.
    pub fn research_summaries(&self) -> Vec<&str> {
        self.research_results
            .iter()
            .filter(|r| !r.degraded)
            .map(|r| r.summary.as_str())
            .collect()
    }
}

/// Partial output returned by one stage visit. Research entries are paired so
/// a merge can never leave `executed_queries` and `research_results` at
/// different lengths.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub messages: Vec<ChatTurn>,
    pub research: Vec<(String, ResearchRecord)>,
    pub sources: Vec<SourceRef>,
    pub execution_results: Vec<ExecutionResult>,
    pub loop_count: Option<u32>,
    pub sufficient: Option<bool>,
    pub follow_up_queries: Option<Vec<String>>,
    pub code_needed: Option<bool>,
    pub generated_code: Option<String>,
    pub final_report: Option<String>,
}

impl StageUpdate {
    pub fn research_entry(record: ResearchRecord) -> Self {
        Self {
            research: vec![(record.query.clone(), record)],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_keeps_query_and_result_lists_in_lockstep() {
        let mut state = WorkflowState::new("solar capacity trends");
        for id in 0..3 {
            let record = ResearchRecord {
                query: format!("q{id}"),
                sequence_id: id,
                summary: format!("summary {id}"),
                source_count: 1,
                degraded: false,
            };
            state.apply(StageUpdate::research_entry(record));
        }
        assert_eq!(state.executed_queries.len(), state.research_results.len());
        assert_eq!(state.executed_queries.len(), 3);
    }

    #[test]
    fn apply_deduplicates_sources_by_url() {
        let mut state = WorkflowState::new("topic");
        let source = SourceRef {
            title: "A".to_string(),
            url: "https://example.com/a".to_string(),
            snippet: String::new(),
        };
        state.apply(StageUpdate {
            sources: vec![source.clone(), source.clone()],
            ..StageUpdate::default()
        });
        state.apply(StageUpdate {
            sources: vec![source],
            ..StageUpdate::default()
        });
        assert_eq!(state.sources.len(), 1);
    }

    #[test]
    fn scalar_fields_are_last_write_wins() {
        let mut state = WorkflowState::new("topic");
        state.apply(StageUpdate {
            loop_count: Some(1),
            sufficient: Some(false),
            follow_up_queries: Some(vec!["a".to_string()]),
            ..StageUpdate::default()
        });
        state.apply(StageUpdate {
            loop_count: Some(2),
            sufficient: Some(true),
            follow_up_queries: Some(Vec::new()),
            ..StageUpdate::default()
        });
        assert_eq!(state.loop_count, 2);
        assert!(state.sufficient);
        assert!(state.follow_up_queries.is_empty());
    }

    #[test]
    fn degraded_records_are_excluded_from_summaries() {
        let mut state = WorkflowState::new("topic");
        state.apply(StageUpdate::research_entry(ResearchRecord {
            query: "ok".to_string(),
            sequence_id: 0,
            summary: "found things".to_string(),
            source_count: 2,
            degraded: false,
        }));
        state.apply(StageUpdate::research_entry(ResearchRecord::degraded(
            "empty", 1,
        )));
        assert_eq!(state.research_summaries(), vec!["found things"]);
        assert_eq!(state.executed_queries.len(), 2);
    }
}
