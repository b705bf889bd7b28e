use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Visualization,
    Calculation,
    Statistical,
    DataProcessing,
    None,
}

impl AnalysisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::Visualization => "visualization",
            AnalysisKind::Calculation => "calculation",
            AnalysisKind::Statistical => "statistical",
            AnalysisKind::DataProcessing => "data_processing",
            AnalysisKind::None => "none",
        }
    }
}

/// A block of generated code on its way through validation and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub text: String,
    pub analysis_kind: AnalysisKind,
    pub validated: bool,
}

impl CodeArtifact {
    pub fn new(text: impl Into<String>, analysis_kind: AnalysisKind) -> Self {
        Self {
            text: text.into(),
            analysis_kind,
            validated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBackend {
    Remote,
    Subprocess,
    Blocked,
    Failed,
}

impl ExecutionBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionBackend::Remote => "remote",
            ExecutionBackend::Subprocess => "subprocess",
            ExecutionBackend::Blocked => "blocked",
            ExecutionBackend::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    TimedOut,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExecutionPayload {
    Text { value: String },
    Number { value: f64 },
    Structured { value: Value },
    Image { base64: String, format: String },
    Empty,
}

/// A raster image captured from executed code, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VizImage {
    pub base64: String,
    pub format: String,
}

/// Normalized outcome shared by every execution backend. Appended to the
/// workflow state and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub backend: ExecutionBackend,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub payload: ExecutionPayload,
    #[serde(default)]
    pub visualizations: Vec<VizImage>,
}

impl ExecutionResult {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            backend: ExecutionBackend::Blocked,
            status: ExecutionStatus::Blocked,
            stdout: String::new(),
            stderr: reason.into(),
            duration_ms: 0,
            payload: ExecutionPayload::Empty,
            visualizations: Vec::new(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            backend: ExecutionBackend::Failed,
            status: ExecutionStatus::Failed,
            stdout: String::new(),
            stderr: detail.into(),
            duration_ms: 0,
            payload: ExecutionPayload::Empty,
            visualizations: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}
