use std::sync::Arc;

use delve_providers::{CompletionRegistry, SearchProvider};
use delve_types::{ResearchRecord, SearchUnit, SourceRef};
use tokio::task::JoinSet;

use crate::prompts;

/// One fan-out branch outcome: the filled research slot plus the sources it
/// contributed.
#[derive(Debug, Clone)]
pub struct ResearchBranch {
    pub record: ResearchRecord,
    pub sources: Vec<SourceRef>,
}

/// Runs one batch of search units concurrently and joins them all before
/// returning. Every unit produces exactly one branch; a failed or empty
/// branch comes back degraded rather than missing. Ordering follows
/// completion, not dispatch.
pub async fn run_research_batch(
    units: Vec<SearchUnit>,
    search: Arc<dyn SearchProvider>,
    completions: CompletionRegistry,
    provider: Option<String>,
    model: Option<String>,
    max_sources: usize,
) -> Vec<ResearchBranch> {
    let mut join_set = JoinSet::new();
    for unit in units.clone() {
        let search = search.clone();
        let completions = completions.clone();
        let provider = provider.clone();
        let model = model.clone();
        join_set.spawn(async move {
            run_branch(unit, search, completions, provider, model, max_sources).await
        });
    }

    let mut branches: Vec<ResearchBranch> = Vec::with_capacity(units.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(branch) => branches.push(branch),
            Err(err) => {
                tracing::error!(error = %err, "research branch task aborted");
            }
        }
    }

    // A panicked task loses its slot; refill it so every unit still has a
    // record and the state length invariant survives.
    for unit in &units {
        if !branches
            .iter()
            .any(|b| b.record.sequence_id == unit.sequence_id)
        {
            branches.push(ResearchBranch {
                record: ResearchRecord::degraded(unit.query.clone(), unit.sequence_id),
                sources: Vec::new(),
            });
        }
    }

    branches
}

async fn run_branch(
    unit: SearchUnit,
    search: Arc<dyn SearchProvider>,
    completions: CompletionRegistry,
    provider: Option<String>,
    model: Option<String>,
    max_sources: usize,
) -> ResearchBranch {
    let hits = match search.search(&unit.query, max_sources).await {
        Ok(hits) => hits,
        Err(err) => {
            tracing::warn!(query = %unit.query, error = %err, "search provider failed");
            return ResearchBranch {
                record: ResearchRecord::degraded(unit.query, unit.sequence_id),
                sources: Vec::new(),
            };
        }
    };
    if hits.is_empty() {
        tracing::warn!(query = %unit.query, "search returned no results");
        return ResearchBranch {
            record: ResearchRecord::degraded(unit.query, unit.sequence_id),
            sources: Vec::new(),
        };
    }

    let sources: Vec<SourceRef> = hits
        .iter()
        .map(|hit| SourceRef {
            title: hit.title.clone(),
            url: hit.url.clone(),
            snippet: hit.snippet.clone(),
        })
        .collect();

    let prompt = prompts::web_searcher_prompt(&unit.query, &hits, &prompts::current_date());
    let summary = match completions
        .complete(provider.as_deref(), &prompt, model.as_deref())
        .await
    {
        Ok(text) => text,
        Err(err) => {
            // Keep the branch: raw snippets are weaker than a synthesis but
            // still evidence.
            tracing::warn!(query = %unit.query, error = %err, "summary completion failed");
            hits.iter()
                .map(|h| h.snippet.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    ResearchBranch {
        record: ResearchRecord {
            query: unit.query,
            sequence_id: unit.sequence_id,
            summary,
            source_count: sources.len(),
            degraded: false,
        },
        sources,
    }
}
