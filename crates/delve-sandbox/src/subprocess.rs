use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use delve_types::{ExecutionBackend, ExecutionPayload, ExecutionResult, ExecutionStatus, VizImage};

const VIZ_BEGIN: &str = "---DELVE-VIZ-BEGIN---";
const VIZ_END: &str = "---DELVE-VIZ-END---";

/// Harness injected ahead of the generated code. Forces a headless plotting
/// backend and replaces `plt.show` with a capture hook that writes each open
/// figure to stdout as a marker-delimited base64 PNG block.
const HARNESS_PRELUDE: &str = r#"import base64 as _delve_base64
import io as _delve_io
import sys as _delve_sys
try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as plt

    def _delve_emit_figure(fig):
        _buf = _delve_io.BytesIO()
        fig.savefig(_buf, format="png", bbox_inches="tight")
        _buf.seek(0)
        _delve_sys.stdout.write("---DELVE-VIZ-BEGIN---\n")
        _delve_sys.stdout.write(_delve_base64.b64encode(_buf.read()).decode("ascii"))
        _delve_sys.stdout.write("\n---DELVE-VIZ-END---\n")
        _buf.close()

    def _delve_show(*args, **kwargs):
        for _num in plt.get_fignums():
            _delve_emit_figure(plt.figure(_num))
        plt.close("all")

    plt.show = _delve_show
except ImportError:
    plt = None
"#;

/// Flushes figures the generated code created but never showed.
const HARNESS_POSTLUDE: &str = r#"
if plt is not None and plt.get_fignums():
    _delve_show()
"#;

/// Runs code in a local interpreter process with a hard wall-clock timeout.
/// The script is written to a uniquely named temp file that is removed again
/// whether or not the run completes.
pub struct SubprocessExecutor {
    interpreter: String,
    timeout: Duration,
}

impl SubprocessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout,
        }
    }

    pub fn with_interpreter(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    pub async fn run(&self, code: &str) -> anyhow::Result<ExecutionResult> {
        let script = format!("{HARNESS_PRELUDE}\n{code}\n{HARNESS_POSTLUDE}");
        let temp = TempScript::write(&script)?;
        self.run_script(temp.path()).await
    }

    async fn run_script(&self, path: &Path) -> anyhow::Result<ExecutionResult> {
        let started = Instant::now();

        let child = tokio::process::Command::new(&self.interpreter)
            .arg(path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Ok(ExecutionResult {
                    backend: ExecutionBackend::Subprocess,
                    status: ExecutionStatus::TimedOut,
                    stdout: String::new(),
                    stderr: format!("execution exceeded {}s", self.timeout.as_secs()),
                    duration_ms: started.elapsed().as_millis() as u64,
                    payload: ExecutionPayload::Empty,
                    visualizations: Vec::new(),
                });
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let raw_stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let (stdout, visualizations) = parse_viz_markers(&raw_stdout);

        let status = if output.status.success() {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        };
        let payload = if let Some(first) = visualizations.first() {
            ExecutionPayload::Image {
                base64: first.base64.clone(),
                format: first.format.clone(),
            }
        } else if stdout.trim().is_empty() {
            ExecutionPayload::Empty
        } else {
            ExecutionPayload::Text {
                value: stdout.trim().to_string(),
            }
        };

        Ok(ExecutionResult {
            backend: ExecutionBackend::Subprocess,
            status,
            stdout,
            stderr,
            duration_ms,
            payload,
            visualizations,
        })
    }
}

/// Splits captured stdout into ordinary output and the base64 image blocks
/// emitted by the harness.
pub fn parse_viz_markers(raw: &str) -> (String, Vec<VizImage>) {
    let mut stdout_lines: Vec<&str> = Vec::new();
    let mut images = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed == VIZ_BEGIN {
            current = Some(String::new());
        } else if trimmed == VIZ_END {
            if let Some(data) = current.take() {
                if !data.is_empty() {
                    images.push(VizImage {
                        base64: data,
                        format: "png".to_string(),
                    });
                }
            }
        } else if let Some(data) = current.as_mut() {
            data.push_str(trimmed);
        } else {
            stdout_lines.push(line);
        }
    }

    (stdout_lines.join("\n"), images)
}

/// Script file in the system temp directory, removed on drop. The uuid name
/// keeps concurrent runs from colliding.
struct TempScript {
    path: PathBuf,
}

impl TempScript {
    fn write(contents: &str) -> anyhow::Result<Self> {
        let path = std::env::temp_dir().join(format!("delve-exec-{}.py", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents)?;
        Ok(Self { path })
    }

    fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_blocks_are_split_from_stdout() {
        let raw = "before\n---DELVE-VIZ-BEGIN---\nAAAA\nBBBB\n---DELVE-VIZ-END---\nafter\n";
        let (stdout, images) = parse_viz_markers(raw);
        assert_eq!(stdout, "before\nafter");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].base64, "AAAABBBB");
        assert_eq!(images[0].format, "png");
    }

    #[test]
    fn unterminated_block_is_discarded() {
        let raw = "line\n---DELVE-VIZ-BEGIN---\nAAAA\n";
        let (stdout, images) = parse_viz_markers(raw);
        assert_eq!(stdout, "line");
        assert!(images.is_empty());
    }

    #[test]
    fn plain_output_passes_through() {
        let (stdout, images) = parse_viz_markers("hello\nworld");
        assert_eq!(stdout, "hello\nworld");
        assert!(images.is_empty());
    }

    #[test]
    fn temp_script_is_removed_on_drop() {
        let path = {
            let temp = TempScript::write("print(1)").expect("write");
            assert!(temp.path().exists());
            temp.path().clone()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn timed_out_run_removes_the_temp_script() {
        // `yes <path>` never exits, forcing the timeout branch without
        // needing a python interpreter.
        let executor = SubprocessExecutor::with_interpreter("yes", Duration::from_millis(200));
        let temp = TempScript::write("print(1)").expect("write");
        let path = temp.path().clone();

        let result = executor.run_script(temp.path()).await.expect("run");
        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert!(path.exists());

        drop(temp);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_interpreter_spawn_still_removes_the_temp_script() {
        let executor = SubprocessExecutor::with_interpreter(
            "delve-no-such-interpreter",
            Duration::from_secs(1),
        );
        let temp = TempScript::write("print(1)").expect("write");
        let path = temp.path().clone();

        assert!(executor.run_script(temp.path()).await.is_err());
        drop(temp);
        assert!(!path.exists());
    }

    #[tokio::test]
    #[ignore = "requires a python3 interpreter on PATH"]
    async fn runs_plain_python() {
        let executor = SubprocessExecutor::new(Duration::from_secs(10));
        let result = executor.run("print(2 + 2)").await.expect("run");
        assert!(result.succeeded());
        assert_eq!(result.stdout.trim(), "4");
    }

    #[tokio::test]
    #[ignore = "requires a python3 interpreter on PATH"]
    async fn infinite_loop_times_out() {
        let executor = SubprocessExecutor::new(Duration::from_secs(2));
        let result = executor.run("while True:\n    pass").await.expect("run");
        assert_eq!(result.status, ExecutionStatus::TimedOut);
    }
}
