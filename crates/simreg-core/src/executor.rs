//! Test matrix expansion and execution.
//!
//! The executor is the orchestration root: it expands test declarations
//! into concrete (project, core, test case) work items, validates filters
//! before anything runs, and drives each item through build, simulation,
//! and verification inside an isolated worker. One item's failure never
//! aborts its siblings; the final outcome list always holds exactly one
//! entry per expanded item, in expansion order.

use crate::build::BuildPipeline;
use crate::config::{ToolchainConfig, WorkspaceLayout};
use crate::descriptor::{CoreDescriptor, ProjectDescriptor};
use crate::error::{RegressionError, Result};
use crate::registry::Registry;
use crate::sim::SimulationDriver;
use crate::testcase::{parse_tests, TestCase, TEST_FILE};
use crate::verify::{evaluate, TestOutcome};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

/// One concrete (project, core, test case) execution unit.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub project: ProjectDescriptor,
    pub core: CoreDescriptor,
    pub case: TestCase,
}

impl WorkItem {
    /// Display identity, e.g. `hello-world on picorv32 [hello world banner]`.
    pub fn id(&self) -> String {
        format!(
            "{} on {} [{}]",
            self.project.name, self.core.name, self.case.description
        )
    }
}

/// Optional restriction of the matrix to one project and/or core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixFilter {
    pub project: Option<String>,
    pub core: Option<String>,
}

/// Expands and executes the test matrix.
pub struct MatrixExecutor {
    layout: WorkspaceLayout,
    build: Arc<BuildPipeline>,
    driver: SimulationDriver,
    parallelism: usize,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl MatrixExecutor {
    /// New executor over `layout` driving `toolchain`, serial by default.
    pub fn new(layout: WorkspaceLayout, toolchain: ToolchainConfig) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            build: Arc::new(BuildPipeline::new(layout.clone(), toolchain.clone())),
            driver: SimulationDriver::new(layout.clone(), toolchain),
            layout,
            parallelism: 1,
            cancel_tx,
            cancel_rx,
        }
    }

    /// Bound the number of concurrently running work items.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Request waveform dumps from the simulator.
    pub fn with_vcd(mut self, vcd: bool) -> Self {
        self.driver.vcd = vcd;
        self
    }

    /// Abort the run: in-flight subprocesses are killed promptly and their
    /// work items report `ERROR` (cancelled) rather than being dropped.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Expand the matrix without executing anything.
    ///
    /// Produces exactly one item per (test case, applicable core). Filter
    /// names are validated against the registry first, so an unknown name
    /// fails before any subprocess launches.
    pub fn expand(&self, registry: &Registry, filter: &MatrixFilter) -> Result<Vec<WorkItem>> {
        if let Some(name) = &filter.project {
            let _ = registry.project(name)?;
        }
        if let Some(name) = &filter.core {
            let _ = registry.core(name)?;
        }

        let mut items = Vec::new();
        for project in registry.projects() {
            if filter.project.as_deref().is_some_and(|p| p != project.name) {
                continue;
            }

            let test_file = project.dir.join(TEST_FILE);
            if !test_file.is_file() {
                // A project without declarations contributes zero items.
                continue;
            }
            let contents = std::fs::read_to_string(&test_file)?;
            let cases = parse_tests(&project.dir, &contents)?;

            for case in cases {
                let applicable: Vec<&str> = case
                    .cores
                    .iter()
                    .filter(|name| {
                        let known = registry.has_core(name);
                        if !known {
                            warn!(
                                project = %project.name,
                                test = %case.description,
                                core = %name,
                                "test lists a core that is not installed, dropping it"
                            );
                        }
                        known
                    })
                    .map(String::as_str)
                    .collect();

                if applicable.is_empty() {
                    return Err(RegressionError::Configuration(format!(
                        "test '{}' in project '{}' has no simulator-compatible cores",
                        case.description, project.name
                    )));
                }

                for core_name in applicable {
                    if filter.core.as_deref().is_some_and(|c| c != core_name) {
                        continue;
                    }
                    items.push(WorkItem {
                        project: project.clone(),
                        core: registry.core(core_name)?.clone(),
                        case: case.clone(),
                    });
                }
            }
        }
        Ok(items)
    }

    /// Expand and execute the matrix, returning one outcome per item.
    pub async fn run(&self, registry: &Registry, filter: &MatrixFilter) -> Result<Vec<TestOutcome>> {
        let items = self.expand(registry, filter)?;
        info!(
            items = items.len(),
            parallelism = self.parallelism,
            root = %self.layout.root.display(),
            "executing test matrix"
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut handles = Vec::with_capacity(items.len());
        let mut identities = Vec::with_capacity(items.len());

        for item in items {
            debug!(item = %item.id(), "queued work item");
            identities.push((
                item.project.name.clone(),
                item.core.name.clone(),
                item.case.description.clone(),
            ));

            let semaphore = Arc::clone(&semaphore);
            let build = Arc::clone(&self.build);
            let driver = self.driver.clone();
            let cancel = self.cancel_rx.clone();

            handles.push(tokio::spawn(async move {
                // The semaphore is FIFO, so with parallelism 1 items run
                // strictly in expansion order. It lives for the whole run
                // and is never closed.
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let start = Instant::now();

                if *cancel.borrow() {
                    return cancelled_outcome(&item, 0);
                }

                tokio::select! {
                    () = cancelled_signal(cancel) => {
                        // Dropping the pipeline future kills its subprocess.
                        cancelled_outcome(&item, start.elapsed().as_millis() as u64)
                    }
                    outcome = run_item(build, driver, &item) => outcome,
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (result, (project, core, description)) in join_all(handles).await.into_iter().zip(identities) {
            let outcome = match result {
                Ok(outcome) => outcome,
                // A panicking worker still yields an outcome for its item.
                Err(e) => TestOutcome::error(
                    &project,
                    &core,
                    &description,
                    format!("worker failed: {e}"),
                    0,
                ),
            };
            info!(
                project = %outcome.project,
                core = %outcome.core,
                test = %outcome.description,
                verdict = %outcome.verdict,
                duration_ms = outcome.duration_ms,
                "work item finished"
            );
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Resolves when cancellation is requested; pends forever otherwise.
async fn cancelled_signal(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender gone without a cancel request.
        std::future::pending::<()>().await;
    }
}

fn cancelled_outcome(item: &WorkItem, duration_ms: u64) -> TestOutcome {
    TestOutcome::error(
        &item.project.name,
        &item.core.name,
        &item.case.description,
        "cancelled".to_string(),
        duration_ms,
    )
}

/// Run one work item's pipeline: build, simulate, verify.
///
/// Every failure mode is folded into the item's own outcome.
async fn run_item(
    build: Arc<BuildPipeline>,
    driver: SimulationDriver,
    item: &WorkItem,
) -> TestOutcome {
    let start = Instant::now();

    let result = async {
        let artifact = build
            .build(&item.project, &item.core, &item.case.build_args)
            .await?;
        driver.run(&item.core, &artifact, item.case.timeout).await
    }
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(capture) => evaluate(
            &item.project.name,
            &item.core.name,
            &item.case,
            &capture,
            duration_ms,
        ),
        Err(e) => TestOutcome::error(
            &item.project.name,
            &item.core.name,
            &item.case.description,
            e.to_string(),
            duration_ms,
        ),
    }
}
