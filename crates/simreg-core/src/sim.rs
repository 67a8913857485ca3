//! Simulation driver: stages a core's HDL sources, compiles them, runs the
//! simulation runtime against a memory image, and captures the UART stream.
//!
//! The simulated design model is fixed: the core's RAM backs the address
//! range starting at its declared base, and the UART base address is a
//! write-triggered single-byte output register. Any store to that address
//! emits the low byte of the written word, whatever write-strobe width the
//! other byte lanes use.
//!
//! Subprocess contract with the simulated design: UART channel bytes stream
//! on stdout exactly as firmware writes them; the testbench reports
//! `TRAP cycle=<n>` or `TIMEOUT cycle=<n>` on stderr and exits zero. Any
//! non-zero exit is a crash and the buffer is not usable for verification.
//! The driver passes the simulated-cycle ceiling as `+max_cycles=<n>`; a
//! separate wall-clock watchdog guards against a hung simulator process.

use crate::config::{ToolchainConfig, WorkspaceLayout};
use crate::descriptor::CoreDescriptor;
use crate::error::{RegressionError, Result};
use crate::invoke::run_tool;
use std::borrow::Cow;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::build::SimulationArtifact;

/// Name the staged memory image gets inside the simulation directory.
pub const IMAGE_FILE: &str = "image.hex";

/// Compiled simulation executable name.
const SIM_EXECUTABLE: &str = "sim.out";

/// Capture ceiling; runaway firmware cannot grow the buffer past this.
pub const MAX_CAPTURE_BYTES: usize = 1 << 20;

/// How one simulation run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    /// The core asserted its trap/halt signal before the budget ran out.
    Trapped { cycles: Option<u64> },

    /// The simulated-cycle budget was exhausted.
    Timeout { cycles: Option<u64> },

    /// The simulator subprocess exited non-zero.
    Crashed { exit_code: i32 },
}

impl TerminalStatus {
    /// Simulated cycle count, when the testbench reported one.
    pub fn cycles(&self) -> Option<u64> {
        match self {
            Self::Trapped { cycles } | Self::Timeout { cycles } => *cycles,
            Self::Crashed { .. } => None,
        }
    }
}

/// Finalized capture of one simulation run.
///
/// Owned by the driver invocation that produced it; the verifier only ever
/// sees this snapshot, never a buffer still being appended to.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    bytes: Vec<u8>,
    truncated: bool,

    /// Terminal status of the run.
    pub status: TerminalStatus,

    /// Simulator diagnostics (stderr), for failure reports.
    pub stderr: String,

    /// Wall-clock duration of the simulation subprocess in milliseconds.
    pub duration_ms: u64,
}

impl CaptureBuffer {
    /// Raw captured channel bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Captured stream decoded as text, for matching and diagnostics.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Whether the capture hit [`MAX_CAPTURE_BYTES`] and was cut off.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

#[cfg(test)]
impl CaptureBuffer {
    pub(crate) fn for_tests(bytes: Vec<u8>, status: TerminalStatus) -> Self {
        Self::for_tests_with_stderr(bytes, status, String::new())
    }

    pub(crate) fn for_tests_with_stderr(
        bytes: Vec<u8>,
        status: TerminalStatus,
        stderr: String,
    ) -> Self {
        Self {
            bytes,
            truncated: false,
            status,
            stderr,
            duration_ms: 0,
        }
    }
}

/// Drives the external HDL compiler and simulation runtime.
#[derive(Debug, Clone)]
pub struct SimulationDriver {
    layout: WorkspaceLayout,
    toolchain: ToolchainConfig,
    /// Ask the testbench for a waveform dump.
    pub vcd: bool,
}

impl SimulationDriver {
    /// New driver over `layout` using the tools in `toolchain`.
    pub fn new(layout: WorkspaceLayout, toolchain: ToolchainConfig) -> Self {
        Self {
            layout,
            toolchain,
            vcd: false,
        }
    }

    /// Run `artifact` on `core` under a simulated-cycle ceiling.
    pub async fn run(
        &self,
        core: &CoreDescriptor,
        artifact: &SimulationArtifact,
        cycle_budget: u64,
    ) -> Result<CaptureBuffer> {
        let sim_dir = self.layout.sim_dir(&artifact.project, &core.name);
        tokio::fs::create_dir_all(&sim_dir).await?;

        self.stage_sources(core, artifact, &sim_dir).await?;
        self.compile_design(core, &sim_dir).await?;
        self.execute(core, &sim_dir, cycle_budget).await
    }

    /// Copy the image and HDL sources into the simulation directory,
    /// pointing every `$readmemh` load at the staged image.
    async fn stage_sources(
        &self,
        core: &CoreDescriptor,
        artifact: &SimulationArtifact,
        sim_dir: &std::path::Path,
    ) -> Result<()> {
        let _ = tokio::fs::copy(&artifact.image_path, sim_dir.join(IMAGE_FILE)).await?;

        for file in &core.verilog_files {
            let src = core.dir.join(file);
            let dst = sim_dir.join(file);
            if let Some(parent) = dst.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let text = tokio::fs::read_to_string(&src).await.map_err(|e| {
                RegressionError::Simulation {
                    core: core.name.clone(),
                    message: format!("cannot read HDL source {}: {e}", src.display()),
                }
            })?;
            tokio::fs::write(&dst, rewrite_readmemh(&text)).await?;
        }
        debug!(core = %core.name, dir = %sim_dir.display(), "staged simulation sources");
        Ok(())
    }

    async fn compile_design(&self, core: &CoreDescriptor, sim_dir: &std::path::Path) -> Result<()> {
        let mut args = vec![
            "-g2012".to_string(),
            "-o".to_string(),
            SIM_EXECUTABLE.to_string(),
        ];
        args.extend(core.verilog_files.iter().map(|f| f.display().to_string()));

        let out = run_tool(&self.toolchain.hdl_compiler, &args, sim_dir, self.toolchain.sim_timeout)
            .await?;
        if !out.success() {
            return Err(RegressionError::Simulation {
                core: core.name.clone(),
                message: format!(
                    "HDL compilation exited with code {}: {}",
                    out.exit_code,
                    out.stderr.trim()
                ),
            });
        }
        Ok(())
    }

    /// Launch the simulation runtime and capture its output.
    ///
    /// The UART stream is drained by a dedicated reader task while the
    /// subprocess runs; the buffer is finalized only after the process has
    /// exited, so verification never races capture.
    async fn execute(
        &self,
        core: &CoreDescriptor,
        sim_dir: &std::path::Path,
        cycle_budget: u64,
    ) -> Result<CaptureBuffer> {
        let start = Instant::now();
        let mut args = vec![SIM_EXECUTABLE.to_string(), format!("+max_cycles={cycle_budget}")];
        if self.vcd {
            args.push("+vcd".to_string());
        }
        info!(core = %core.name, cycle_budget, "launching simulation");

        let mut child = Command::new(&self.toolchain.sim_runtime)
            .args(&args)
            .current_dir(sim_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RegressionError::Launch {
                tool: self.toolchain.sim_runtime.display().to_string(),
                source: e,
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| RegressionError::Simulation {
            core: core.name.clone(),
            message: "simulator stdout was not captured".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| RegressionError::Simulation {
            core: core.name.clone(),
            message: "simulator stderr was not captured".to_string(),
        })?;

        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut truncated = false;
            let mut chunk = [0u8; 4096];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if !append_capped(&mut buf, &chunk[..n], MAX_CAPTURE_BYTES) {
                            truncated = true;
                        }
                    }
                }
            }
            (buf, truncated)
        });
        let err_reader = tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        });

        let exit = match tokio::time::timeout(self.toolchain.sim_timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                reader.abort();
                err_reader.abort();
                return Err(RegressionError::Watchdog {
                    tool: self.toolchain.sim_runtime.display().to_string(),
                    timeout_secs: self.toolchain.sim_timeout.as_secs(),
                });
            }
        };

        let join_err = |e: tokio::task::JoinError| RegressionError::Simulation {
            core: core.name.clone(),
            message: format!("capture task failed: {e}"),
        };
        let (bytes, truncated) = reader.await.map_err(join_err)?;
        let stderr_text = err_reader.await.map_err(join_err)?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let status = match exit.code() {
            Some(0) => parse_terminal_status(&stderr_text),
            code => TerminalStatus::Crashed {
                exit_code: code.unwrap_or(-1),
            },
        };

        if truncated {
            warn!(core = %core.name, "UART capture exceeded {MAX_CAPTURE_BYTES} bytes, truncated");
        }
        debug!(core = %core.name, ?status, bytes = bytes.len(), duration_ms, "simulation finished");

        Ok(CaptureBuffer {
            bytes,
            truncated,
            status,
            stderr: stderr_text,
            duration_ms,
        })
    }
}

/// Append `chunk` to `buf` without growing past `max`.
///
/// Returns false when any byte was dropped.
fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], max: usize) -> bool {
    let room = max.saturating_sub(buf.len());
    let take = chunk.len().min(room);
    buf.extend_from_slice(&chunk[..take]);
    take == chunk.len()
}

/// Point every `$readmemh` load in an HDL source at the staged image file.
fn rewrite_readmemh(text: &str) -> String {
    let re = regex::Regex::new(r#"\$readmemh\s*\(\s*"[^"]*"\s*,"#).expect("static regex");
    re.replace_all(text, format!("$$readmemh(\"{IMAGE_FILE}\","))
        .into_owned()
}

/// Parse the testbench's terminal-status report from its stderr.
///
/// The last recognizable marker wins; a clean exit with no marker counts as
/// a trap (the design halted on its own).
fn parse_terminal_status(stderr: &str) -> TerminalStatus {
    let re = regex::Regex::new(r"^(TRAP|TIMEOUT)\b(?:.*?cycle=(\d+))?").expect("static regex");
    for line in stderr.lines().rev() {
        if let Some(cap) = re.captures(line.trim()) {
            let cycles = cap.get(2).and_then(|m| m.as_str().parse().ok());
            return match &cap[1] {
                "TIMEOUT" => TerminalStatus::Timeout { cycles },
                _ => TerminalStatus::Trapped { cycles },
            };
        }
    }
    TerminalStatus::Trapped { cycles: None }
}
