//! CLI execution tool.
//!
//! Runs a binary with the sandbox base as its working directory. The binary
//! policy rejects path-qualified and deny-listed commands before anything
//! spawns. Output is captured with caps and non-zero exits are reported in
//! the payload, not as errors.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::sandbox::BinaryPolicy;
use crate::tool::{Tool, ToolContext};

/// Cap on captured stdout/stderr, each.
const OUTPUT_CAP: usize = 64 * 1024;

/// Default wall-clock bound.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct CliArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    stdin: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// The `run_cli` tool.
#[derive(Debug, Clone, Default)]
pub struct RunCliTool {
    policy: BinaryPolicy,
}

impl RunCliTool {
    /// Create the tool with the default binary policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the tool with a custom policy.
    #[must_use]
    pub fn with_policy(policy: BinaryPolicy) -> Self {
        Self { policy }
    }
}

fn cap(mut bytes: Vec<u8>) -> (String, bool) {
    let truncated = bytes.len() > OUTPUT_CAP;
    if truncated {
        bytes.truncate(OUTPUT_CAP);
    }
    (String::from_utf8_lossy(&bytes).into_owned(), truncated)
}

#[async_trait]
impl Tool for RunCliTool {
    fn name(&self) -> &str {
        "run_cli"
    }

    fn description(&self) -> &str {
        "Run a command in the project workspace and capture its output"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Binary name (no path)"},
                "args": {"type": "array", "items": {"type": "string"}},
                "stdin": {"type": "string", "description": "Text piped to stdin"},
                "timeout_ms": {"type": "integer", "description": "Wall-clock bound"}
            },
            "required": ["command"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: CliArgs = serde_json::from_value(args)?;
        self.policy.check(&args.command)?;
        let workdir = ctx.sandbox()?.base().to_path_buf();

        let mut command = Command::new(&args.command);
        command
            .args(&args.args)
            .current_dir(&workdir)
            .stdin(if args.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| Error::invalid(format!("spawn {:?}: {e}", args.command)))?;

        if let Some(stdin_text) = &args.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(stdin_text.as_bytes())
                    .await
                    .map_err(|e| Error::backend(format!("write stdin: {e}")))?;
            }
        }

        let timeout = args
            .timeout_ms
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis);
        let output = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Err(_) => {
                    return Err(Error::timeout(format!("command {:?}", args.command)));
                }
                Ok(output) => output.map_err(|e| Error::backend(e.to_string()))?,
            },
        };

        let (stdout, out_truncated) = cap(output.stdout);
        let (stderr, err_truncated) = cap(output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(json!({
            "ok": exit_code == 0,
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
            "truncated": out_truncated || err_truncated,
            "duration_ms": started.elapsed().as_millis() as u64,
        }))
    }
}
