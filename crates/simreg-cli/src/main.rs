//! simreg - firmware regression harness CLI
//!
//! ## Commands
//!
//! - `run`: execute the test matrix (optionally filtered by project/core)
//! - `list-projects`: show discovered firmware projects
//! - `list-cores`: show discovered core descriptors
//! - `core-info`: show one core's memory and simulator configuration
//!
//! Exit codes: 0 when every work item passed, 1 when any failed or an error
//! occurred, 2 when the matrix expanded to zero work items.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use simreg_core::{
    init_tracing, render_console, MatrixExecutor, MatrixFilter, Registry, ReportFile, Summary,
    ToolchainConfig, WorkspaceLayout,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{warn, Level};

const EXIT_FAILURES: u8 = 1;
const EXIT_NO_TESTS: u8 = 2;

#[derive(Parser)]
#[command(name = "simreg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Simulation-based regression harness for soft-core firmware", long_about = None)]
struct Cli {
    /// Workspace root containing projects/, cores/, output/
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the test matrix
    Run {
        /// Only run tests declared by this project
        #[arg(short, long)]
        project: Option<String>,

        /// Only run tests on this core
        #[arg(short, long)]
        core: Option<String>,

        /// Number of work items to run concurrently
        #[arg(short, long, default_value = "1")]
        jobs: usize,

        /// Write a machine-readable report to this path
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Ask the simulator for waveform dumps
        #[arg(long)]
        vcd: bool,
    },

    /// List discovered projects
    ListProjects,

    /// List discovered cores
    ListCores,

    /// Show one core's configuration
    CoreInfo {
        /// Core name
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FAILURES)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let layout = WorkspaceLayout::at(&cli.workspace);
    let registry = Registry::discover(&layout)
        .with_context(|| format!("failed to scan workspace {}", cli.workspace.display()))?;

    match cli.command {
        Commands::Run {
            project,
            core,
            jobs,
            report,
            vcd,
        } => {
            cmd_run(
                layout,
                &registry,
                MatrixFilter { project, core },
                jobs,
                report,
                vcd,
                cli.verbose,
            )
            .await
        }
        Commands::ListProjects => {
            cmd_list_projects(&registry);
            Ok(0)
        }
        Commands::ListCores => {
            cmd_list_cores(&registry);
            Ok(0)
        }
        Commands::CoreInfo { name } => {
            cmd_core_info(&registry, &name)?;
            Ok(0)
        }
    }
}

async fn cmd_run(
    layout: WorkspaceLayout,
    registry: &Registry,
    filter: MatrixFilter,
    jobs: usize,
    report: Option<PathBuf>,
    vcd: bool,
    verbose: bool,
) -> Result<u8> {
    let executor = Arc::new(
        MatrixExecutor::new(layout, ToolchainConfig::default())
            .with_parallelism(jobs)
            .with_vcd(vcd),
    );

    // Ctrl-C aborts the run: outstanding simulator and compiler processes
    // are killed and their work items report ERROR (cancelled).
    let canceller = Arc::clone(&executor);
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling outstanding work items");
            canceller.cancel();
        }
    });

    let start = Instant::now();
    let outcomes = executor.run(registry, &filter).await?;
    let summary = Summary::aggregate(outcomes, start.elapsed().as_millis() as u64);

    if summary.is_empty() {
        println!("no test cases discovered");
        return Ok(EXIT_NO_TESTS);
    }

    print!("{}", render_console(&summary, verbose));

    if let Some(path) = report {
        ReportFile::from_summary(&summary)
            .write(&path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("report written to {}", path.display());
    }

    Ok(exit_code(&summary))
}

fn exit_code(summary: &Summary) -> u8 {
    if summary.success() {
        0
    } else {
        EXIT_FAILURES
    }
}

fn cmd_list_projects(registry: &Registry) {
    let mut any = false;
    println!("Projects:");
    for project in registry.projects() {
        any = true;
        match &project.target {
            Some(target) => println!("  - {} (target: {target})", project.name),
            None => println!("  - {}", project.name),
        }
    }
    if !any {
        println!("  (none found)");
    }
}

fn cmd_list_cores(registry: &Registry) {
    let mut any = false;
    println!("Available cores:");
    for core in registry.cores() {
        any = true;
        println!("  - {} ({})", core.name, core.simulator);
    }
    if !any {
        println!("  (none found)");
    }
}

fn cmd_core_info(registry: &Registry, name: &str) -> Result<()> {
    let core = registry.core(name)?;
    println!("Core: {}", core.name);
    if !core.description.is_empty() {
        println!("  description: {}", core.description);
    }
    println!("  simulator: {}", core.simulator);
    println!(
        "  memory: base {:#010x}, {} bytes, {}-byte words",
        core.memory.base_address, core.memory.size_bytes, core.memory.word_size
    );
    println!("  uart: base {:#010x}", core.uart_base);
    println!("  sources:");
    for file in &core.verilog_files {
        println!("    - {}", file.display());
    }
    Ok(())
}
