use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use delve_types::{ExecutionBackend, ExecutionResult};

use crate::remote::SessionPoolClient;
use crate::safety::SafetyPolicy;
use crate::subprocess::SubprocessExecutor;

/// Common surface for execution backends. Errors mean the backend could not
/// run the code at all; a completed run that failed inside the interpreter is
/// still an `Ok` result.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    fn backend(&self) -> ExecutionBackend;
    async fn execute(&self, code: &str) -> anyhow::Result<ExecutionResult>;
}

#[async_trait]
impl CodeExecutor for SessionPoolClient {
    fn backend(&self) -> ExecutionBackend {
        ExecutionBackend::Remote
    }

    async fn execute(&self, code: &str) -> anyhow::Result<ExecutionResult> {
        SessionPoolClient::execute(self, code).await
    }
}

#[async_trait]
impl CodeExecutor for SubprocessExecutor {
    fn backend(&self) -> ExecutionBackend {
        ExecutionBackend::Subprocess
    }

    async fn execute(&self, code: &str) -> anyhow::Result<ExecutionResult> {
        self.run(code).await
    }
}

/// Routes execution requests: safety screen first, then the remote pool when
/// configured, then the local subprocess. Infallible by contract; when every
/// backend gives out the caller still gets a failed result to record.
pub struct ExecutionCoordinator {
    safety: SafetyPolicy,
    remote: Option<Arc<dyn CodeExecutor>>,
    local: Arc<dyn CodeExecutor>,
}

impl ExecutionCoordinator {
    pub fn new(remote_endpoint: Option<&str>, remote_token: Option<String>, timeout: Duration) -> Self {
        let remote: Option<Arc<dyn CodeExecutor>> = remote_endpoint
            .filter(|e| !e.trim().is_empty())
            .map(|endpoint| {
                Arc::new(SessionPoolClient::new(endpoint, remote_token)) as Arc<dyn CodeExecutor>
            });
        Self {
            safety: SafetyPolicy::default(),
            remote,
            local: Arc::new(SubprocessExecutor::new(timeout)),
        }
    }

    pub fn with_backends(
        remote: Option<Arc<dyn CodeExecutor>>,
        local: Arc<dyn CodeExecutor>,
    ) -> Self {
        Self {
            safety: SafetyPolicy::default(),
            remote,
            local,
        }
    }

    pub async fn execute(&self, code: &str) -> ExecutionResult {
        if let Err(violation) = self.safety.validate(code) {
            tracing::warn!(pattern = %violation.pattern, "code blocked by safety screen");
            return ExecutionResult::blocked(violation.to_string());
        }

        if let Some(remote) = &self.remote {
            match remote.execute(code).await {
                Ok(result) => return result,
                Err(err) => {
                    tracing::warn!(error = %err, "remote execution failed, falling back to subprocess");
                }
            }
        }

        match self.local.execute(code).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(error = %err, "subprocess execution failed");
                ExecutionResult::failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_types::{ExecutionPayload, ExecutionStatus};

    struct FailingRemote;

    #[async_trait]
    impl CodeExecutor for FailingRemote {
        fn backend(&self) -> ExecutionBackend {
            ExecutionBackend::Remote
        }

        async fn execute(&self, _code: &str) -> anyhow::Result<ExecutionResult> {
            anyhow::bail!("connection refused")
        }
    }

    struct CannedLocal;

    #[async_trait]
    impl CodeExecutor for CannedLocal {
        fn backend(&self) -> ExecutionBackend {
            ExecutionBackend::Subprocess
        }

        async fn execute(&self, _code: &str) -> anyhow::Result<ExecutionResult> {
            Ok(ExecutionResult {
                backend: ExecutionBackend::Subprocess,
                status: ExecutionStatus::Succeeded,
                stdout: "ok\n".to_string(),
                stderr: String::new(),
                duration_ms: 5,
                payload: ExecutionPayload::Text {
                    value: "ok".to_string(),
                },
                visualizations: Vec::new(),
            })
        }
    }

    struct BrokenLocal;

    #[async_trait]
    impl CodeExecutor for BrokenLocal {
        fn backend(&self) -> ExecutionBackend {
            ExecutionBackend::Subprocess
        }

        async fn execute(&self, _code: &str) -> anyhow::Result<ExecutionResult> {
            anyhow::bail!("interpreter not found")
        }
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_local() {
        let coordinator = ExecutionCoordinator::with_backends(
            Some(Arc::new(FailingRemote)),
            Arc::new(CannedLocal),
        );
        let result = coordinator.execute("print('ok')").await;
        assert!(result.succeeded());
        assert_eq!(result.backend, ExecutionBackend::Subprocess);
    }

    #[tokio::test]
    async fn unsafe_code_is_blocked_before_any_backend() {
        let coordinator = ExecutionCoordinator::with_backends(None, Arc::new(CannedLocal));
        let result = coordinator.execute("import os\nos.system('ls')").await;
        assert_eq!(result.status, ExecutionStatus::Blocked);
        assert_eq!(result.backend, ExecutionBackend::Blocked);
    }

    #[tokio::test]
    async fn all_backends_failing_yields_failed_result() {
        let coordinator = ExecutionCoordinator::with_backends(
            Some(Arc::new(FailingRemote)),
            Arc::new(BrokenLocal),
        );
        let result = coordinator.execute("print(1)").await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.stderr.contains("interpreter not found"));
    }
}
