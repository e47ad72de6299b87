//! A [`ConversionEngine`] that delegates each operation to an external program.
//!
//! ## Protocol
//!
//! For operation `merge`, the engine runs `<scripts_dir>/merge` with the input
//! paths as arguments. A JSON job is written to the program's stdin:
//!
//! ```json
//! {"operation":"merge","params":{"operation":"merge"},
//!  "inputs":["/staging/a.pdf","/staging/b.pdf"],"output":"/staging/x.pdf"}
//! ```
//!
//! `output` is a pre-allocated, empty artifact (also exported as
//! `DOCBOT_OUTPUT`). A program that writes a single result fills that file and
//! prints nothing. A program that writes several (e.g. `split`) prints
//! `{"outputs":["/staging/p1.pdf", ...]}`; every listed path must be directly
//! inside the staging directory.
//!
//! Page counts come from `<scripts_dir>/page_count <input>`, which prints a
//! single integer.
//!
//! A non-zero exit status is a failure; its stderr becomes the error detail.

use super::{ConversionEngine, EngineOutput, EngineRequest};
use crate::artifact::{ArtifactHandle, ArtifactManager};
use crate::error::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const STDERR_PREVIEW_CHARS: usize = 2_000;
const PAGE_COUNT_PROGRAM: &str = "page_count";

/// Default per-call time budget; must stay below the artifact retention.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
pub struct ScriptEngine {
    scripts_dir: PathBuf,
    interpreter: Option<PathBuf>,
    timeout: Duration,
    artifacts: Arc<ArtifactManager>,
}

impl ScriptEngine {
    pub fn new(scripts_dir: impl Into<PathBuf>, artifacts: Arc<ArtifactManager>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            interpreter: None,
            timeout: DEFAULT_TIMEOUT,
            artifacts,
        }
    }

    /// Run scripts through `program` (e.g. `sh`, `python3`) instead of
    /// executing them directly.
    pub fn with_interpreter(mut self, program: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(program.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(script);
                cmd
            }
            None => Command::new(script),
        };
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Spawn `script`, feed it `stdin`, and wait within the time budget.
    async fn invoke(
        &self,
        operation: &str,
        mut cmd: Command,
        script: &Path,
        stdin: &[u8],
    ) -> Result<Output, EngineError> {
        let mut child = cmd.spawn().map_err(|source| EngineError::Launch {
            program: script.to_path_buf(),
            source,
        })?;

        if let Some(mut pipe) = child.stdin.take() {
            // A script that ignores stdin may close it early; that is not an error.
            if let Err(e) = pipe.write_all(stdin).await {
                debug!("{} did not read its job: {}", operation, e);
            }
            drop(pipe);
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| EngineError::Timeout {
                operation: operation.to_string(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| EngineError::Failed {
                operation: operation.to_string(),
                detail: format!("waiting for process output failed: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed {
                operation: operation.to_string(),
                detail: format!(
                    "exited with {}: {}",
                    output.status,
                    preview_text(stderr.trim(), STDERR_PREVIEW_CHARS)
                ),
            });
        }
        Ok(output)
    }

    fn script_path(&self, name: &str) -> Result<PathBuf, EngineError> {
        let path = self.scripts_dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(EngineError::Unsupported {
                operation: name.to_string(),
            })
        }
    }

    fn collect_outputs(
        &self,
        operation: &str,
        stdout: &[u8],
        allocated: &ArtifactHandle,
    ) -> Result<Vec<ArtifactHandle>, EngineError> {
        let text = String::from_utf8_lossy(stdout);
        if text.trim().is_empty() {
            return Ok(vec![allocated.clone()]);
        }

        let reply: ScriptReply = serde_json::from_str(text.trim()).map_err(|e| EngineError::Failed {
            operation: operation.to_string(),
            detail: format!("invalid reply on stdout: {e}"),
        })?;

        reply
            .outputs
            .into_iter()
            .map(|path| {
                self.artifacts
                    .adopt(path.clone())
                    .ok_or_else(|| EngineError::Failed {
                        operation: operation.to_string(),
                        detail: format!("output '{}' is outside the staging directory", path.display()),
                    })
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct ScriptJob<'a> {
    operation: &'a str,
    params: &'a crate::params::OperationParams,
    inputs: Vec<&'a Path>,
    output: &'a ArtifactHandle,
}

#[derive(Debug, Deserialize)]
struct ScriptReply {
    #[serde(default)]
    outputs: Vec<PathBuf>,
}

#[async_trait]
impl ConversionEngine for ScriptEngine {
    async fn page_count(&self, document: &ArtifactHandle) -> Result<usize, EngineError> {
        let script = self.script_path(PAGE_COUNT_PROGRAM)?;
        let mut cmd = self.command(&script);
        cmd.arg(document.path());

        let output = self.invoke(PAGE_COUNT_PROGRAM, cmd, &script, &[]).await?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<usize>().map_err(|_| EngineError::Failed {
            operation: PAGE_COUNT_PROGRAM.to_string(),
            detail: format!("expected a page count, got '{}'", preview_text(text.trim(), 80)),
        })
    }

    async fn run(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError> {
        let operation = request.operation.as_str();
        let script = self.script_path(operation)?;

        let extension = request.params.output_extension(request.operation);
        let allocated = self
            .artifacts
            .allocate(extension)
            .await
            .map_err(|e| EngineError::staging(operation, e))?;

        let job = serde_json::to_vec(&ScriptJob {
            operation,
            params: &request.params,
            inputs: request.inputs.iter().map(|f| f.handle.path()).collect(),
            output: &allocated,
        })
        .map_err(|e| EngineError::Failed {
            operation: operation.to_string(),
            detail: format!("serialising job failed: {e}"),
        })?;

        let mut cmd = self.command(&script);
        cmd.args(request.inputs.iter().map(|f| f.handle.path()))
            .env("DOCBOT_OPERATION", operation)
            .env("DOCBOT_OUTPUT", allocated.path());

        debug!(
            "Running {} on {} input(s) via {}",
            operation,
            request.inputs.len(),
            script.display()
        );
        let result = self
            .invoke(operation, cmd, &script, &job)
            .await
            .and_then(|output| self.collect_outputs(operation, &output.stdout, &allocated));

        match result {
            Ok(artifacts) => {
                if !artifacts.contains(&allocated) {
                    self.artifacts.release(&allocated).await;
                }
                Ok(EngineOutput { artifacts })
            }
            Err(e) => {
                warn!("{} failed: {}", operation, e);
                self.artifacts.release(&allocated).await;
                Err(e)
            }
        }
    }
}

fn preview_text(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}
