//! Workspace discovery: projects and core descriptors.
//!
//! Discovery is a read-only filesystem scan. A descriptor that fails schema
//! validation is excluded and reported as a warning; it never prevents other
//! valid descriptors from being used.

use crate::config::WorkspaceLayout;
use crate::descriptor::{CoreDescriptor, ProjectDescriptor, CORE_FILE, PROJECT_FILE};
use crate::error::{RegressionError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// A non-fatal problem found while scanning the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryWarning {
    /// Path of the offending descriptor.
    pub path: String,

    /// Why it was excluded.
    pub message: String,
}

/// Immutable snapshot of the discoverable workspace contents.
///
/// Built once per run; descriptors do not change for the run's duration.
#[derive(Debug, Default)]
pub struct Registry {
    projects: BTreeMap<String, ProjectDescriptor>,
    cores: BTreeMap<String, CoreDescriptor>,
    warnings: Vec<DiscoveryWarning>,
}

impl Registry {
    /// Scan the workspace and build a registry.
    ///
    /// A project is any `projects/<name>/` directory containing a
    /// `Cargo.toml`; a core is any `cores/<name>/` directory containing a
    /// valid `core.json`.
    pub fn discover(layout: &WorkspaceLayout) -> Result<Self> {
        let mut registry = Self::default();

        for dir in subdirs(&layout.projects_dir)? {
            if !dir.join("Cargo.toml").is_file() {
                debug!(path = %dir.display(), "skipping non-project directory");
                continue;
            }
            let project_file = dir.join(PROJECT_FILE);
            let contents = if project_file.is_file() {
                Some(fs::read_to_string(&project_file)?)
            } else {
                None
            };
            match ProjectDescriptor::parse(&dir, contents.as_deref()) {
                Ok(p) => {
                    debug!(project = %p.name, "discovered project");
                    let _ = registry.projects.insert(p.name.clone(), p);
                }
                Err(e) => registry.warn(&project_file, e.to_string()),
            }
        }

        for dir in subdirs(&layout.cores_dir)? {
            let core_file = dir.join(CORE_FILE);
            if !core_file.is_file() {
                debug!(path = %dir.display(), "skipping directory without core.json");
                continue;
            }
            let contents = fs::read_to_string(&core_file)?;
            match CoreDescriptor::parse(&dir, &contents) {
                Ok(c) => {
                    debug!(core = %c.name, simulator = %c.simulator, "discovered core");
                    let _ = registry.cores.insert(c.name.clone(), c);
                }
                Err(e) => registry.warn(&core_file, e.to_string()),
            }
        }

        Ok(registry)
    }

    fn warn(&mut self, path: &Path, message: String) {
        warn!(path = %path.display(), %message, "excluding descriptor");
        self.warnings.push(DiscoveryWarning {
            path: path.display().to_string(),
            message,
        });
    }

    /// All discovered projects, ordered by name.
    pub fn projects(&self) -> impl Iterator<Item = &ProjectDescriptor> {
        self.projects.values()
    }

    /// All discovered cores, ordered by name.
    pub fn cores(&self) -> impl Iterator<Item = &CoreDescriptor> {
        self.cores.values()
    }

    /// Warnings accumulated during discovery.
    pub fn warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }

    /// Resolve a project by name.
    pub fn project(&self, name: &str) -> Result<&ProjectDescriptor> {
        self.projects
            .get(name)
            .ok_or_else(|| RegressionError::not_found("project", name))
    }

    /// Resolve a core by name.
    pub fn core(&self, name: &str) -> Result<&CoreDescriptor> {
        self.cores
            .get(name)
            .ok_or_else(|| RegressionError::not_found("core", name))
    }

    /// Whether a core with this name exists.
    pub fn has_core(&self, name: &str) -> bool {
        self.cores.contains_key(name)
    }
}

/// Subdirectories of `dir`, or empty when the directory does not exist.
fn subdirs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
