//! External tool invocation with wall-clock watchdogs.
//!
//! Every blocking interaction with the outside world (firmware compiler,
//! objcopy, HDL compiler, simulation runtime) goes through [`run_tool`]. The
//! watchdog timeout is wall-clock and entirely independent of any
//! simulated-cycle budget; it exists to catch hung tools.

use crate::error::{RegressionError, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Captured result of one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code (-1 when the process died without one).
    pub exit_code: i32,

    /// Captured stdout bytes.
    pub stdout: Vec<u8>,

    /// Captured stderr, lossily decoded.
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutput {
    /// Whether the tool exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout lossily decoded, for diagnostics.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run `program` with `args` in `cwd`, killing it when `timeout` expires.
///
/// The child is spawned with `kill_on_drop`, so cancelling the future that
/// awaits it terminates the subprocess rather than orphaning it.
pub async fn run_tool(
    program: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<ToolOutput> {
    let start = Instant::now();
    debug!(tool = %program.display(), ?args, cwd = %cwd.display(), "invoking external tool");

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RegressionError::Launch {
            tool: program.display().to_string(),
            source: e,
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| RegressionError::Watchdog {
            tool: program.display().to_string(),
            timeout_secs: timeout.as_secs(),
        })??;

    Ok(ToolOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
