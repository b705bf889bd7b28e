use std::path::{Path, PathBuf};
use std::sync::Arc;

use delve_providers::{ProvidersConfig, SearchSettings};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;
use tokio::sync::RwLock;

/// Per-stage model overrides. `None` defers to the selected provider's
/// default model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StageModels {
    pub query_model: Option<String>,
    pub reflection_model: Option<String>,
    pub answer_model: Option<String>,
    pub code_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_initial_query_count")]
    pub initial_query_count: usize,
    #[serde(default = "default_max_research_loops")]
    pub max_research_loops: u32,
    #[serde(default)]
    pub code_interpreter_enabled: bool,
    #[serde(default)]
    pub remote_execution_enabled: bool,
    pub remote_endpoint: Option<String>,
    pub remote_token: Option<String>,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    pub provider: Option<String>,
    #[serde(default)]
    pub models: StageModels,
    #[serde(default)]
    pub completion: ProvidersConfig,
    #[serde(default)]
    pub search: SearchSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_query_count: default_initial_query_count(),
            max_research_loops: default_max_research_loops(),
            code_interpreter_enabled: false,
            remote_execution_enabled: false,
            remote_endpoint: None,
            remote_token: None,
            execution_timeout_secs: default_execution_timeout_secs(),
            provider: None,
            models: StageModels::default(),
            completion: ProvidersConfig::default(),
            search: SearchSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Startup validation. This is the only error class that aborts a run;
    /// every later failure degrades inside the workflow instead.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_query_count == 0 {
            anyhow::bail!("initial_query_count must be at least 1");
        }
        if self.max_research_loops == 0 {
            anyhow::bail!("max_research_loops must be at least 1");
        }
        if self.execution_timeout_secs == 0 {
            anyhow::bail!("execution_timeout_secs must be at least 1");
        }
        if self.remote_execution_enabled
            && self
                .remote_endpoint
                .as_deref()
                .map_or(true, |e| e.trim().is_empty())
        {
            anyhow::bail!("remote_execution_enabled requires remote_endpoint");
        }
        Ok(())
    }
}

fn default_initial_query_count() -> usize {
    3
}

fn default_max_research_loops() -> u32 {
    2
}

fn default_execution_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    file: Value,
    env: Value,
    cli: Value,
}

/// Layered configuration: config file < environment < CLI overrides,
/// deep-merged into one effective document.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(path: impl AsRef<Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = read_json_file(&path).await?;
        let layers = ConfigLayers {
            file,
            env: env_layer(),
            cli: cli_overrides.unwrap_or_else(empty_object),
        };
        Ok(Self {
            path,
            layers: Arc::new(RwLock::new(layers)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self) -> EngineConfig {
        let merged = self.get_effective_value().await;
        serde_json::from_value(merged).unwrap_or_default()
    }

    pub async fn get_effective_value(&self) -> Value {
        let layers = self.layers.read().await.clone();
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.file);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.cli);
        merged
    }
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        return Ok(empty_object());
    }
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| empty_object()))
}

fn env_layer() -> Value {
    let mut root = empty_object();

    if let Some(count) = env_usize("DELVE_INITIAL_QUERY_COUNT") {
        deep_merge(&mut root, &json!({ "initial_query_count": count }));
    }
    if let Some(loops) = env_usize("DELVE_MAX_RESEARCH_LOOPS") {
        deep_merge(&mut root, &json!({ "max_research_loops": loops }));
    }
    if let Some(enabled) = env_bool("DELVE_CODE_INTERPRETER") {
        deep_merge(&mut root, &json!({ "code_interpreter_enabled": enabled }));
    }
    if let Some(enabled) = env_bool("DELVE_REMOTE_EXECUTION") {
        deep_merge(&mut root, &json!({ "remote_execution_enabled": enabled }));
    }
    if let Some(endpoint) = env_string("POOL_MANAGEMENT_ENDPOINT") {
        deep_merge(&mut root, &json!({ "remote_endpoint": endpoint }));
    }
    if let Some(secs) = env_usize("DELVE_EXECUTION_TIMEOUT_SECS") {
        deep_merge(&mut root, &json!({ "execution_timeout_secs": secs }));
    }
    if let Some(provider) = env_string("DELVE_PROVIDER") {
        deep_merge(&mut root, &json!({ "provider": provider }));
    }
    if let Some(engine) = env_string("DELVE_SEARCH_ENGINE") {
        deep_merge(&mut root, &json!({ "search": { "engine": engine } }));
    }

    root
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_usize(name: &str) -> Option<usize> {
    env_string(name)?.trim().parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    parse_bool_like(&env_string(name)?)
}

fn parse_bool_like(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn zero_loops_is_fatal() {
        let config = EngineConfig {
            max_research_loops: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_enabled_without_endpoint_is_fatal() {
        let config = EngineConfig {
            remote_execution_enabled: true,
            remote_endpoint: Some("  ".to_string()),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deep_merge_is_recursive_and_skips_null() {
        let mut base = json!({ "search": { "engine": "tavily", "max_sources_per_query": 5 } });
        deep_merge(
            &mut base,
            &json!({ "search": { "engine": "serpapi", "tavily_api_key": null } }),
        );
        assert_eq!(base["search"]["engine"], "serpapi");
        assert_eq!(base["search"]["max_sources_per_query"], 5);
        assert!(base["search"].get("tavily_api_key").is_none());
    }

    #[tokio::test]
    async fn cli_layer_overrides_file_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("delve.json");
        std::fs::write(&path, r#"{"max_research_loops": 4, "initial_query_count": 2}"#)
            .expect("write");

        let store = ConfigStore::new(&path, Some(json!({ "max_research_loops": 1 })))
            .await
            .expect("store");
        let config = store.get().await;
        assert_eq!(config.max_research_loops, 1);
        assert_eq!(config.initial_query_count, 2);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("absent.json"), None)
            .await
            .expect("store");
        let config = store.get().await;
        assert_eq!(config.initial_query_count, 3);
        assert_eq!(config.execution_timeout_secs, 30);
    }
}
