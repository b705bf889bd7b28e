use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub default_provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub default_model: String,
}

/// The completion oracle behind every prompting stage. Opaque
/// request/response: one prompt in, one text out. Implementations may return
/// malformed or non-JSON text; callers must tolerate it.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn info(&self) -> ProviderInfo;
    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct CompletionRegistry {
    providers: Arc<Vec<Arc<dyn CompletionProvider>>>,
    default_provider: Option<String>,
}

impl CompletionRegistry {
    pub fn new(config: ProvidersConfig) -> Self {
        let providers = build_providers(&config);
        Self {
            providers: Arc::new(providers),
            default_provider: config.default_provider,
        }
    }

    /// Registry over pre-built providers. Used by tests and embedders that
    /// bring their own implementations.
    pub fn from_providers(
        providers: Vec<Arc<dyn CompletionProvider>>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            providers: Arc::new(providers),
            default_provider,
        }
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers.iter().map(|p| p.info()).collect()
    }

    pub async fn complete(
        &self,
        provider_id: Option<&str>,
        prompt: &str,
        model_id: Option<&str>,
    ) -> anyhow::Result<String> {
        let provider = self.select_provider(provider_id)?;
        provider.complete(prompt, model_id).await
    }

    fn select_provider(&self, provider_id: Option<&str>) -> anyhow::Result<Arc<dyn CompletionProvider>> {
        let available = self
            .providers
            .iter()
            .map(|p| p.info().id)
            .collect::<Vec<_>>();

        if let Some(id) = provider_id {
            if let Some(provider) = self.providers.iter().find(|p| p.info().id == id) {
                return Ok(provider.clone());
            }
            anyhow::bail!(
                "provider `{}` is not configured. configured providers: {}",
                id,
                available.join(", ")
            );
        }

        if let Some(default_id) = &self.default_provider {
            if let Some(provider) = self.providers.iter().find(|p| &p.info().id == default_id) {
                return Ok(provider.clone());
            }
        }

        let Some(provider) = self.providers.first() else {
            anyhow::bail!("No completion provider configured.");
        };
        Ok(provider.clone())
    }
}

fn build_providers(config: &ProvidersConfig) -> Vec<Arc<dyn CompletionProvider>> {
    let mut providers: Vec<Arc<dyn CompletionProvider>> = Vec::new();

    add_openai_provider(
        config,
        &mut providers,
        "openai",
        "OpenAI",
        "https://api.openai.com/v1",
        "gpt-4.1-mini",
        true,
    );
    add_openai_provider(
        config,
        &mut providers,
        "openrouter",
        "OpenRouter",
        "https://openrouter.ai/api/v1",
        "openai/gpt-4o-mini",
        true,
    );
    add_openai_provider(
        config,
        &mut providers,
        "ollama",
        "Ollama",
        "http://127.0.0.1:11434/v1",
        "llama3.1:8b",
        false,
    );

    if let Some(azure) = config.providers.get("azure") {
        providers.push(Arc::new(AzureDeploymentProvider {
            api_key: azure
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(|key| key.to_string())
                .or_else(|| {
                    std::env::var("AZURE_OPENAI_API_KEY")
                        .ok()
                        .filter(|v| !v.trim().is_empty())
                }),
            endpoint: azure
                .url
                .clone()
                .or_else(|| std::env::var("AZURE_OPENAI_ENDPOINT").ok())
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            default_deployment: azure
                .default_model
                .clone()
                .unwrap_or_else(|| "gpt-4.1-mini".to_string()),
            api_version: std::env::var("AZURE_OPENAI_API_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "2024-02-15-preview".to_string()),
            client: Client::new(),
        }));
    }

    if providers.is_empty() {
        providers.push(Arc::new(LocalEchoProvider));
    }

    providers
}

fn add_openai_provider(
    config: &ProvidersConfig,
    providers: &mut Vec<Arc<dyn CompletionProvider>>,
    id: &str,
    name: &str,
    default_url: &str,
    default_model: &str,
    use_api_key: bool,
) {
    let Some(entry) = config.providers.get(id) else {
        return;
    };
    providers.push(Arc::new(OpenAICompatibleProvider {
        id: id.to_string(),
        name: name.to_string(),
        base_url: normalize_base(entry.url.as_deref().unwrap_or(default_url)),
        api_key: if use_api_key {
            entry
                .api_key
                .as_deref()
                .filter(|key| !is_placeholder_api_key(key))
                .map(|key| key.to_string())
                .or_else(|| env_api_key_for_provider(id))
        } else {
            None
        },
        default_model: entry
            .default_model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        client: Client::new(),
    }));
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

fn env_api_key_for_provider(id: &str) -> Option<String> {
    let env_name = match id {
        "openai" => Some("OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }?;
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

struct LocalEchoProvider;

#[async_trait]
impl CompletionProvider for LocalEchoProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "local".to_string(),
            name: "Local Echo".to_string(),
            default_model: "echo-1".to_string(),
        }
    }

    async fn complete(
        &self,
        prompt: &str,
        _model_override: Option<&str>,
    ) -> anyhow::Result<String> {
        Ok(format!("Echo: {prompt}"))
    }
}

struct OpenAICompatibleProvider {
    id: String,
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: Client,
}

#[async_trait]
impl CompletionProvider for OpenAICompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            default_model: self.default_model.clone(),
        }
    }

    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String> {
        let model = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str());
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&json!({
            "model": model,
            "messages": [{"role":"user","content": prompt}],
            "stream": false,
        }));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }

        if let Some(detail) = extract_openai_error(&value) {
            anyhow::bail!(detail);
        }

        if let Some(text) = extract_openai_text(&value) {
            return Ok(text);
        }

        let body_preview = truncate_for_error(&value.to_string(), 500);
        anyhow::bail!(
            "provider returned no completion content for model `{}` (response: {})",
            model,
            body_preview
        );
    }
}

/// Azure-style deployment endpoint: the model name selects a deployment path
/// segment and the key travels in an `api-key` header rather than a bearer.
struct AzureDeploymentProvider {
    api_key: Option<String>,
    endpoint: String,
    default_deployment: String,
    api_version: String,
    client: Client,
}

#[async_trait]
impl CompletionProvider for AzureDeploymentProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "azure".to_string(),
            name: "Azure OpenAI".to_string(),
            default_model: self.default_deployment.clone(),
        }
    }

    async fn complete(&self, prompt: &str, model_override: Option<&str>) -> anyhow::Result<String> {
        if self.endpoint.is_empty() {
            anyhow::bail!("azure provider requires an endpoint URL");
        }
        let deployment = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_deployment.as_str());
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, deployment, self.api_version
        );
        let mut req = self.client.post(url).json(&json!({
            "messages": [{"role":"user","content": prompt}],
        }));
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("azure request failed with status {}", status));
            anyhow::bail!(detail);
        }
        if let Some(text) = extract_openai_text(&value) {
            return Ok(text);
        }
        anyhow::bail!("azure returned no completion content for deployment `{deployment}`");
    }
}

fn normalize_base(input: &str) -> String {
    if input.ends_with("/v1") {
        input.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", input.trim_end_matches('/'))
    }
}

fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        input.to_string()
    } else {
        format!("{}...", &input[..max_len])
    }
}

fn collect_text_fragments(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Array(arr) => {
            for item in arr {
                collect_text_fragments(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text_fragments(content, out);
            }
            if let Some(message) = map.get("message") {
                collect_text_fragments(message, out);
            }
        }
        _ => {}
    }
}

fn extract_openai_text(value: &serde_json::Value) -> Option<String> {
    let mut out = String::new();

    if let Some(choice) = value.get("choices").and_then(|v| v.get(0)) {
        collect_text_fragments(choice, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    if let Some(text) = value
        .get("choices")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("text"))
        .and_then(|v| v.as_str())
    {
        return Some(text.to_string());
    }

    if let Some(content) = value.get("content") {
        collect_text_fragments(content, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    None
}

fn extract_openai_error(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider_ids: &[&str], default_provider: Option<&str>) -> ProvidersConfig {
        let mut providers = HashMap::new();
        for id in provider_ids {
            providers.insert(
                (*id).to_string(),
                ProviderConfig {
                    api_key: Some("sk-test".to_string()),
                    url: None,
                    default_model: Some(format!("{id}-model")),
                },
            );
        }
        ProvidersConfig {
            providers,
            default_provider: default_provider.map(|s| s.to_string()),
        }
    }

    #[test]
    fn explicit_provider_wins_over_default_provider() {
        let registry = CompletionRegistry::new(cfg(&["openai", "openrouter"], Some("openai")));
        let provider = registry
            .select_provider(Some("openrouter"))
            .expect("provider");
        assert_eq!(provider.info().id, "openrouter");
    }

    #[test]
    fn uses_default_provider_when_explicit_provider_missing() {
        let registry = CompletionRegistry::new(cfg(&["openai", "openrouter"], Some("openrouter")));
        let provider = registry.select_provider(None).expect("provider");
        assert_eq!(provider.info().id, "openrouter");
    }

    #[test]
    fn falls_back_to_first_provider_when_default_provider_missing() {
        let registry = CompletionRegistry::new(cfg(&["openai"], Some("azure")));
        let provider = registry.select_provider(None).expect("provider");
        assert_eq!(provider.info().id, "openai");
    }

    #[test]
    fn explicit_unknown_provider_errors() {
        let registry = CompletionRegistry::new(cfg(&["openai"], None));
        let err = registry
            .select_provider(Some("openruter"))
            .err()
            .expect("expected error");
        assert!(err
            .to_string()
            .contains("provider `openruter` is not configured"));
    }

    #[test]
    fn empty_config_falls_back_to_echo() {
        let registry = CompletionRegistry::new(ProvidersConfig::default());
        let provider = registry.select_provider(None).expect("provider");
        assert_eq!(provider.info().id, "local");
    }

    #[test]
    fn extract_openai_text_reads_chat_shape() {
        let value = serde_json::json!({
            "choices": [{"message": {"content": "hello"}}]
        });
        assert_eq!(extract_openai_text(&value).as_deref(), Some("hello"));
    }
}
