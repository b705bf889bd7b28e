use std::time::Duration;

use delve_types::{ExecutionBackend, ExecutionPayload, ExecutionResult, ExecutionStatus};
use serde_json::{json, Value};

const API_VERSION: &str = "2024-02-02-preview";

/// Client for a managed session-pool execution endpoint. Each run posts the
/// code synchronously against a session identifier; any transport or protocol
/// failure surfaces as an error so the coordinator can fall back.
pub struct SessionPoolClient {
    endpoint: String,
    token: Option<String>,
    session_id: String,
    client: reqwest::Client,
}

impl SessionPoolClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            session_id: uuid::Uuid::new_v4().to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn execute(&self, code: &str) -> anyhow::Result<ExecutionResult> {
        let url = format!(
            "{}/code/execute?api-version={}&identifier={}",
            self.endpoint, API_VERSION, self.session_id
        );
        let body = json!({
            "properties": {
                "codeInputType": "inline",
                "executionType": "synchronous",
                "code": code,
            }
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("session pool returned status {}: {}", status, text);
        }

        let value: Value = response.json().await?;
        Ok(parse_pool_response(&value))
    }
}

fn parse_pool_response(value: &Value) -> ExecutionResult {
    let props = value.get("properties").unwrap_or(value);

    let status_text = props
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let status = if status_text.eq_ignore_ascii_case("Succeeded") {
        ExecutionStatus::Succeeded
    } else {
        ExecutionStatus::Failed
    };

    let stdout = props
        .get("stdout")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let stderr = props
        .get("stderr")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let duration_ms = props
        .get("executionTimeInMilliseconds")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let payload = match props.get("executionResult") {
        Some(Value::String(s)) if !s.is_empty() => ExecutionPayload::Text { value: s.clone() },
        Some(Value::Number(n)) => ExecutionPayload::Number {
            value: n.as_f64().unwrap_or(0.0),
        },
        Some(Value::Null) | None => ExecutionPayload::Empty,
        Some(other) => ExecutionPayload::Structured {
            value: other.clone(),
        },
    };

    ExecutionResult {
        backend: ExecutionBackend::Remote,
        status,
        stdout,
        stderr,
        duration_ms,
        payload,
        visualizations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_response_is_normalized() {
        let value = json!({
            "properties": {
                "status": "Succeeded",
                "stdout": "42\n",
                "stderr": "",
                "executionResult": 42,
                "executionTimeInMilliseconds": 117,
            }
        });
        let result = parse_pool_response(&value);
        assert!(result.succeeded());
        assert_eq!(result.backend, ExecutionBackend::Remote);
        assert_eq!(result.stdout, "42\n");
        assert_eq!(result.duration_ms, 117);
        assert_eq!(result.payload, ExecutionPayload::Number { value: 42.0 });
    }

    #[test]
    fn non_succeeded_status_maps_to_failed() {
        let value = json!({
            "properties": {
                "status": "Failed",
                "stderr": "NameError: name 'x' is not defined",
            }
        });
        let result = parse_pool_response(&value);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.stderr.contains("NameError"));
        assert_eq!(result.payload, ExecutionPayload::Empty);
    }

    #[test]
    fn structured_results_survive_as_json() {
        let value = json!({
            "properties": {
                "status": "Succeeded",
                "executionResult": {"mean": 3.5, "rows": 12},
            }
        });
        let result = parse_pool_response(&value);
        match result.payload {
            ExecutionPayload::Structured { value } => {
                assert_eq!(value["rows"], 12);
            }
            other => panic!("expected structured payload, got {other:?}"),
        }
    }
}
