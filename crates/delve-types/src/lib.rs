mod execution;
mod state;

pub use execution::{
    AnalysisKind, CodeArtifact, ExecutionBackend, ExecutionPayload, ExecutionResult,
    ExecutionStatus, VizImage,
};
pub use state::{
    ChatRole, ChatTurn, ReflectionDecision, ResearchRecord, SearchUnit, SourceRef, StageUpdate,
    WorkflowState,
};
