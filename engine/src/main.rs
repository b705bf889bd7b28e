use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use delve_core::{ConfigStore, Engine};
use delve_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, redact_text,
    ObservabilityEvent, ProcessKind,
};
use delve_sandbox::{validate_code, ExecutionCoordinator, SafetyPolicy};
use delve_types::CodeArtifact;
use tracing::info;

const SUPPORTED_PROVIDER_IDS: [&str; 4] = ["openai", "openrouter", "ollama", "azure"];

#[derive(Parser, Debug)]
#[command(name = "delve-engine")]
#[command(about = "Headless Delve research workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the research workflow for one topic and print the report.
    Run {
        topic: String,
        #[arg(long, default_value_t = false)]
        json: bool,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        queries: Option<usize>,
        #[arg(long)]
        loops: Option<u32>,
        #[arg(long, default_value_t = false)]
        code: bool,
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Run the code and safety validators over a snippet (inline, @file, or -)
    /// without executing it; with no snippet, load and validate configuration
    /// and print the effective document.
    Check {
        code: Option<String>,
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Validate and execute a code snippet directly (inline, @file, or -).
    Exec {
        code: String,
        #[arg(long)]
        remote_endpoint: Option<String>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            topic,
            json,
            api_key,
            provider,
            model,
            queries,
            loops,
            code,
            config,
            state_dir,
        } => {
            let redacted_key = api_key.as_deref().map(redact_text);
            let overrides = build_cli_overrides(api_key, provider, model, queries, loops, code)?;
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_log_guard, log_info) = init_process_logging(ProcessKind::Engine, &logs_dir, 14)?;
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "logging.initialized",
                    component: "engine.main",
                    status: Some("ok"),
                    detail: Some("engine jsonl logging initialized"),
                    ..ObservabilityEvent::default()
                },
            );
            info!("engine logging initialized: {:?}", log_info);
            if let Some(redacted) = &redacted_key {
                emit_event(
                    tracing::Level::INFO,
                    ProcessKind::Engine,
                    ObservabilityEvent {
                        event: "cli.override.api_key",
                        component: "engine.main",
                        status: Some("ok"),
                        detail: Some(redacted),
                        ..ObservabilityEvent::default()
                    },
                );
            }

            let config_path = resolve_config_path(config, &state_dir);
            let store = ConfigStore::new(&config_path, overrides).await?;
            let engine_config = store.get().await;
            let engine = Engine::from_config(engine_config)?;

            let state = engine.run(&topic).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                println!("{}", state.final_report);
            }
        }
        Command::Check {
            code,
            config,
            state_dir,
        } => {
            if let Some(code) = code {
                let text = read_code_input(&code)?;
                match screen_code(&text) {
                    Ok(artifact) => {
                        println!("accepted ({})", artifact.analysis_kind.as_str());
                    }
                    Err(err) => {
                        eprintln!("rejected: {err}");
                        std::process::exit(1);
                    }
                }
                return Ok(());
            }
            let state_dir = resolve_state_dir(state_dir);
            let config_path = resolve_config_path(config, &state_dir);
            let store = ConfigStore::new(&config_path, None).await?;
            let engine_config = store.get().await;
            engine_config.validate()?;
            println!("{}", serde_json::to_string_pretty(&store.get_effective_value().await)?);
        }
        Command::Exec {
            code,
            remote_endpoint,
            timeout_secs,
        } => {
            let text = read_code_input(&code)?;
            let artifact = match screen_code(&text) {
                Ok(artifact) => artifact,
                Err(err) => {
                    eprintln!("rejected: {err}");
                    std::process::exit(1);
                }
            };
            let coordinator = ExecutionCoordinator::new(
                remote_endpoint.as_deref(),
                None,
                Duration::from_secs(timeout_secs.max(1)),
            );
            let result = coordinator.execute(&artifact.text).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

/// Code and safety validators only; execution is the caller's decision.
fn screen_code(text: &str) -> anyhow::Result<CodeArtifact> {
    let artifact = validate_code(text).map_err(|err| anyhow::anyhow!("{err}"))?;
    SafetyPolicy::default()
        .validate(&artifact.text)
        .map_err(|violation| anyhow::anyhow!("{violation}"))?;
    Ok(artifact)
}

fn build_cli_overrides(
    api_key: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    queries: Option<usize>,
    loops: Option<u32>,
    code: bool,
) -> anyhow::Result<Option<serde_json::Value>> {
    let provider = normalize_and_validate_provider(provider)?;

    if api_key.is_none()
        && provider.is_none()
        && model.is_none()
        && queries.is_none()
        && loops.is_none()
        && !code
    {
        return Ok(None);
    }
    let mut root = serde_json::Map::new();

    if let Some(p) = &provider {
        root.insert("provider".to_string(), serde_json::Value::String(p.clone()));
    }
    if let Some(n) = queries {
        root.insert("initial_query_count".to_string(), serde_json::json!(n));
    }
    if let Some(n) = loops {
        root.insert("max_research_loops".to_string(), serde_json::json!(n));
    }
    if code {
        root.insert("code_interpreter_enabled".to_string(), serde_json::json!(true));
    }

    if api_key.is_some() || model.is_some() || provider.is_some() {
        let target_provider = provider.as_deref().unwrap_or("openai");
        let mut provider_config = serde_json::Map::new();
        if let Some(k) = api_key {
            provider_config.insert("api_key".to_string(), serde_json::Value::String(k));
        }
        if let Some(m) = model {
            provider_config.insert("default_model".to_string(), serde_json::Value::String(m));
        }

        let mut providers = serde_json::Map::new();
        providers.insert(
            target_provider.to_string(),
            serde_json::Value::Object(provider_config),
        );
        let mut completion = serde_json::Map::new();
        completion.insert("providers".to_string(), serde_json::Value::Object(providers));
        if let Some(p) = &provider {
            completion.insert(
                "default_provider".to_string(),
                serde_json::Value::String(p.clone()),
            );
        }
        root.insert("completion".to_string(), serde_json::Value::Object(completion));
    }

    Ok(Some(serde_json::Value::Object(root)))
}

fn normalize_and_validate_provider(provider: Option<String>) -> anyhow::Result<Option<String>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let normalized = provider.trim().to_lowercase();
    if normalized.is_empty() {
        anyhow::bail!(
            "provider cannot be empty. supported providers: {}",
            SUPPORTED_PROVIDER_IDS.join(", ")
        );
    }
    if SUPPORTED_PROVIDER_IDS.contains(&normalized.as_str()) {
        return Ok(Some(normalized));
    }
    anyhow::bail!(
        "unsupported provider `{}`. supported providers: {}",
        provider,
        SUPPORTED_PROVIDER_IDS.join(", ")
    );
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("DELVE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".delve")
}

fn resolve_config_path(flag: Option<String>, state_dir: &std::path::Path) -> PathBuf {
    flag.map(PathBuf::from)
        .unwrap_or_else(|| state_dir.join("config.json"))
}

fn read_code_input(input: &str) -> anyhow::Result<String> {
    if input.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    if let Some(path) = input.strip_prefix('@') {
        return Ok(std::fs::read_to_string(path)?);
    }
    Ok(input.to_string())
}
