//! Engine configuration: workspace layout and external toolchain binding.
//!
//! Both structs are plain values handed to constructors. The engine never
//! reads toolchain locations from the ambient process environment; anything
//! it invokes is named here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory layout of a regression workspace.
///
/// A workspace holds firmware projects under `projects/`, core descriptors
/// under `cores/`, and transient build/simulation products under `output/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Workspace root.
    pub root: PathBuf,

    /// Directory containing one subdirectory per firmware project.
    pub projects_dir: PathBuf,

    /// Directory containing one subdirectory per core descriptor.
    pub cores_dir: PathBuf,

    /// Root for build artifacts and simulation scratch directories.
    pub output_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Standard layout rooted at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            projects_dir: root.join("projects"),
            cores_dir: root.join("cores"),
            output_dir: root.join("output"),
            root,
        }
    }

    /// Build output directory for one (project, core) pair.
    ///
    /// Partitioned so concurrent work items never share an output path.
    pub fn build_dir(&self, project: &str, core: &str) -> PathBuf {
        self.output_dir.join("build").join(format!("{project}-{core}"))
    }

    /// Simulation scratch directory for one (project, core) pair.
    pub fn sim_dir(&self, project: &str, core: &str) -> PathBuf {
        self.output_dir.join("sim").join(format!("{project}-{core}"))
    }
}

/// External tools the engine drives, with their wall-clock budgets.
///
/// The wall-clock timeouts guard against hung tools and are independent of
/// any simulated-cycle budget a test case declares.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Firmware compiler frontend (invoked as `<compiler> build ...`).
    pub compiler: PathBuf,

    /// ELF to raw-binary converter (invoked as `<objcopy> -O binary <in> <out>`).
    pub objcopy: PathBuf,

    /// HDL compiler producing a runnable simulation (iverilog-compatible).
    pub hdl_compiler: PathBuf,

    /// Simulation runtime executing the compiled design (vvp-compatible).
    pub sim_runtime: PathBuf,

    /// Target triple used when a project does not declare its own.
    pub default_target: String,

    /// Wall-clock ceiling for one compiler or objcopy invocation.
    pub build_timeout: Duration,

    /// Wall-clock ceiling for one HDL compile or simulation run.
    pub sim_timeout: Duration,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("cargo"),
            objcopy: PathBuf::from("llvm-objcopy"),
            hdl_compiler: PathBuf::from("iverilog"),
            sim_runtime: PathBuf::from("vvp"),
            default_target: "riscv32i-unknown-none-elf".to_string(),
            build_timeout: Duration::from_secs(300),
            sim_timeout: Duration::from_secs(600),
        }
    }
}

impl ToolchainConfig {
    /// Resolve a tool path relative to `dir` when it is not absolute.
    ///
    /// Lets test fixtures point every tool at stub scripts in one directory.
    pub fn rooted_at(dir: &Path) -> Self {
        let defaults = Self::default();
        Self {
            compiler: dir.join(&defaults.compiler),
            objcopy: dir.join(&defaults.objcopy),
            hdl_compiler: dir.join(&defaults.hdl_compiler),
            sim_runtime: dir.join(&defaults.sim_runtime),
            ..defaults
        }
    }
}
