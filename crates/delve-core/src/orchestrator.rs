use std::sync::Arc;
use std::time::Duration;

use delve_observability::{emit_event, ObservabilityEvent, ProcessKind};
use delve_providers::{build_search_provider, CompletionRegistry, SearchProvider};
use delve_sandbox::{validate_code, ExecutionCoordinator};
use delve_types::{
    ChatTurn, ExecutionResult, ReflectionDecision, SearchUnit, StageUpdate, WorkflowState,
};
use tracing::Level;

use crate::config::EngineConfig;
use crate::parse::{parse_query_list, parse_reflection};
use crate::prompts;
use crate::research::run_research_batch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GenerateQueries,
    WebResearch,
    Reflect,
    Finalize,
    CodeGenerate,
    CodeExecute,
    Report,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::GenerateQueries => "generate_queries",
            Stage::WebResearch => "web_research",
            Stage::Reflect => "reflect",
            Stage::Finalize => "finalize",
            Stage::CodeGenerate => "code_generate",
            Stage::CodeExecute => "code_execute",
            Stage::Report => "report",
        }
    }
}

/// Route taken after each reflection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Continue,
    Finalize,
}

/// Loop-termination policy: finalize on sufficiency, on hitting the loop cap,
/// or when an insufficient reflection produced no follow-ups to run.
pub fn route_after_reflection(
    decision: &ReflectionDecision,
    loop_count: u32,
    max_loops: u32,
) -> Route {
    if decision.sufficient || loop_count >= max_loops || decision.follow_up_queries.is_empty() {
        Route::Finalize
    } else {
        Route::Continue
    }
}

/// Keyword signal that the accumulated research calls for quantitative
/// analysis. Gates code generation together with the config switch.
pub fn quantitative_signal(text: &str) -> bool {
    let lower = text.to_lowercase();
    [
        "calculate",
        "compute",
        "average",
        "mean",
        "median",
        "percentage",
        "growth rate",
        "statistic",
        "correlation",
        "regression",
        "trend",
        "forecast",
        "chart",
        "plot",
        "graph",
        "visualiz",
        "how many",
        "total",
        "compare the numbers",
    ]
    .iter()
    .any(|t| lower.contains(t))
}

/// The workflow engine. Owns the stage graph and the collaborators every
/// stage talks to; one `run` drives a single topic from queries to report.
pub struct Engine {
    config: EngineConfig,
    completions: CompletionRegistry,
    search: Arc<dyn SearchProvider>,
    executor: ExecutionCoordinator,
}

impl Engine {
    pub fn from_config(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let completions = CompletionRegistry::new(config.completion.clone());
        let search = build_search_provider(&config.search);
        let executor = ExecutionCoordinator::new(
            if config.remote_execution_enabled {
                config.remote_endpoint.as_deref()
            } else {
                None
            },
            config.remote_token.clone(),
            Duration::from_secs(config.execution_timeout_secs),
        );
        Ok(Self {
            config,
            completions,
            search,
            executor,
        })
    }

    /// Collaborator injection for tests and embedders.
    pub fn with_collaborators(
        config: EngineConfig,
        completions: CompletionRegistry,
        search: Arc<dyn SearchProvider>,
        executor: ExecutionCoordinator,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            completions,
            search,
            executor,
        })
    }

    /// Drives the full stage graph. Infallible once constructed: stage
    /// failures degrade into the state rather than escaping.
    pub async fn run(&self, topic: &str) -> WorkflowState {
        let mut state = WorkflowState::new(topic);
        self.stage_event(&state, Stage::GenerateQueries, "stage_start", None);

        let queries = self.generate_queries(&state).await;
        let mut batch: Vec<SearchUnit> = queries
            .into_iter()
            .enumerate()
            .map(|(id, query)| SearchUnit::new(query, id))
            .collect();

        loop {
            self.stage_event(&state, Stage::WebResearch, "stage_start", None);
            let branches = run_research_batch(
                batch,
                self.search.clone(),
                self.completions.clone(),
                self.config.provider.clone(),
                self.config.models.query_model.clone(),
                self.config.search.max_sources_per_query,
            )
            .await;

            let mut update = StageUpdate::default();
            for branch in branches {
                update
                    .research
                    .push((branch.record.query.clone(), branch.record));
                update.sources.extend(branch.sources);
            }
            state.apply(update);

            self.stage_event(&state, Stage::Reflect, "stage_start", None);
            let decision = self.reflect(&state).await;
            state.apply(StageUpdate {
                loop_count: Some(state.loop_count + 1),
                sufficient: Some(decision.sufficient),
                follow_up_queries: Some(decision.follow_up_queries.clone()),
                ..StageUpdate::default()
            });

            match route_after_reflection(&decision, state.loop_count, self.config.max_research_loops)
            {
                Route::Finalize => break,
                Route::Continue => {
                    let start = state.executed_queries.len();
                    batch = state
                        .follow_up_queries
                        .iter()
                        .enumerate()
                        .map(|(offset, query)| SearchUnit::new(query.clone(), start + offset))
                        .collect();
                }
            }
        }

        self.stage_event(&state, Stage::Finalize, "stage_start", None);
        let code_needed = self.config.code_interpreter_enabled
            && quantitative_signal(&format!(
                "{}\n{}",
                state.topic,
                prompts::join_summaries(&state.research_summaries())
            ));
        state.apply(StageUpdate {
            code_needed: Some(code_needed),
            ..StageUpdate::default()
        });

        if code_needed {
            self.run_code_stages(&mut state).await;
        }

        self.stage_event(&state, Stage::Report, "stage_start", None);
        let report = self.compose_report(&state).await;
        state.apply(StageUpdate {
            messages: vec![ChatTurn::assistant(report.clone())],
            final_report: Some(report),
            ..StageUpdate::default()
        });

        self.stage_event(&state, Stage::Report, "run_complete", None);
        state
    }

    async fn generate_queries(&self, state: &WorkflowState) -> Vec<String> {
        let prompt = prompts::query_writer_prompt(
            &state.topic,
            self.config.initial_query_count,
            &prompts::current_date(),
        );
        match self
            .completions
            .complete(
                self.config.provider.as_deref(),
                &prompt,
                self.config.models.query_model.as_deref(),
            )
            .await
        {
            Ok(raw) => parse_query_list(&raw, &state.topic, self.config.initial_query_count),
            Err(err) => {
                self.stage_event(
                    state,
                    Stage::GenerateQueries,
                    "completion_failed",
                    Some(&err.to_string()),
                );
                vec![state.topic.clone()]
            }
        }
    }

    async fn reflect(&self, state: &WorkflowState) -> ReflectionDecision {
        let summaries = prompts::join_summaries(&state.research_summaries());
        let prompt = prompts::reflection_prompt(&state.topic, &summaries);
        match self
            .completions
            .complete(
                self.config.provider.as_deref(),
                &prompt,
                self.config.models.reflection_model.as_deref(),
            )
            .await
        {
            Ok(raw) => parse_reflection(&raw),
            Err(err) => {
                // Degraded decision: insufficient with no follow-ups, which
                // the starvation guard routes straight to finalize.
                self.stage_event(state, Stage::Reflect, "completion_failed", Some(&err.to_string()));
                ReflectionDecision::default()
            }
        }
    }

    async fn run_code_stages(&self, state: &mut WorkflowState) {
        self.stage_event(state, Stage::CodeGenerate, "stage_start", None);
        let summaries = prompts::join_summaries(&state.research_summaries());
        let prompt = prompts::code_writer_prompt(&state.topic, &summaries);

        let raw = match self
            .completions
            .complete(
                self.config.provider.as_deref(),
                &prompt,
                self.config.models.code_model.as_deref(),
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                self.stage_event(
                    state,
                    Stage::CodeGenerate,
                    "completion_failed",
                    Some(&err.to_string()),
                );
                state.apply(StageUpdate {
                    execution_results: vec![ExecutionResult::failed(format!(
                        "code generation failed: {err}"
                    ))],
                    ..StageUpdate::default()
                });
                return;
            }
        };

        let artifact = match validate_code(&raw) {
            Ok(artifact) => artifact,
            Err(err) => {
                self.stage_event(
                    state,
                    Stage::CodeGenerate,
                    "validation_rejected",
                    Some(&err.to_string()),
                );
                state.apply(StageUpdate {
                    execution_results: vec![ExecutionResult::failed(format!(
                        "generated code rejected: {err}"
                    ))],
                    ..StageUpdate::default()
                });
                return;
            }
        };

        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "code_validated",
                component: "orchestrator",
                request_id: Some(&state.request_id),
                stage: Some(Stage::CodeGenerate.as_str()),
                status: Some("ok"),
                detail: Some(artifact.analysis_kind.as_str()),
                ..ObservabilityEvent::default()
            },
        );
        state.apply(StageUpdate {
            generated_code: Some(artifact.text.clone()),
            ..StageUpdate::default()
        });

        self.stage_event(state, Stage::CodeExecute, "stage_start", None);
        let result = self.executor.execute(&artifact.text).await;
        emit_event(
            if result.succeeded() {
                Level::INFO
            } else {
                Level::WARN
            },
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "code_executed",
                component: "orchestrator",
                request_id: Some(&state.request_id),
                stage: Some(Stage::CodeExecute.as_str()),
                backend: Some(result.backend.as_str()),
                status: Some(if result.succeeded() { "ok" } else { "degraded" }),
                ..ObservabilityEvent::default()
            },
        );
        state.apply(StageUpdate {
            execution_results: vec![result],
            ..StageUpdate::default()
        });
    }

    async fn compose_report(&self, state: &WorkflowState) -> String {
        let summaries = prompts::join_summaries(&state.research_summaries());
        let prompt = prompts::answer_prompt(&state.topic, &summaries, &prompts::current_date());
        let mut report = match self
            .completions
            .complete(
                self.config.provider.as_deref(),
                &prompt,
                self.config.models.answer_model.as_deref(),
            )
            .await
        {
            Ok(text) => text,
            Err(err) => {
                self.stage_event(state, Stage::Report, "completion_failed", Some(&err.to_string()));
                if summaries.is_empty() {
                    format!("No research material could be gathered for: {}", state.topic)
                } else {
                    summaries
                }
            }
        };

        if let Some(result) = state.execution_results.iter().find(|r| r.succeeded()) {
            if !result.stdout.trim().is_empty() {
                report.push_str("\n\n## Analysis output\n\n```\n");
                report.push_str(result.stdout.trim());
                report.push_str("\n```\n");
            }
        }

        if !state.sources.is_empty() {
            report.push_str("\n\n## References\n");
            for source in &state.sources {
                if source.url.is_empty() {
                    continue;
                }
                report.push_str(&format!("- [{}]({})\n", source.title, source.url));
            }
        }

        report
    }

    fn stage_event(&self, state: &WorkflowState, stage: Stage, event: &str, detail: Option<&str>) {
        let level = if detail.is_some() {
            Level::WARN
        } else {
            Level::INFO
        };
        emit_event(
            level,
            ProcessKind::Engine,
            ObservabilityEvent {
                event,
                component: "orchestrator",
                request_id: Some(&state.request_id),
                stage: Some(stage.as_str()),
                detail,
                ..ObservabilityEvent::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(sufficient: bool, follow_ups: &[&str]) -> ReflectionDecision {
        ReflectionDecision {
            sufficient,
            knowledge_gap: String::new(),
            follow_up_queries: follow_ups.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn sufficiency_finalizes() {
        assert_eq!(
            route_after_reflection(&decision(true, &["more"]), 1, 3),
            Route::Finalize
        );
    }

    #[test]
    fn loop_cap_finalizes() {
        assert_eq!(
            route_after_reflection(&decision(false, &["more"]), 2, 2),
            Route::Finalize
        );
    }

    #[test]
    fn starvation_guard_finalizes_without_follow_ups() {
        assert_eq!(
            route_after_reflection(&decision(false, &[]), 1, 3),
            Route::Finalize
        );
    }

    #[test]
    fn insufficient_with_follow_ups_continues() {
        assert_eq!(
            route_after_reflection(&decision(false, &["more"]), 1, 3),
            Route::Continue
        );
    }

    #[test]
    fn quantitative_signal_matches_analysis_topics() {
        assert!(quantitative_signal(
            "Compare the average growth rate of solar vs wind capacity"
        ));
        assert!(!quantitative_signal("History of the printing press"));
    }
}
