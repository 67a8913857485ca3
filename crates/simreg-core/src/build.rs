//! Firmware build pipeline: compile, objcopy, memory-image conversion.
//!
//! Builds are deterministic, so within one run the pipeline memoizes by
//! build key: concurrent work items sharing a key perform the build exactly
//! once and all waiters observe the same completed artifact.

use crate::config::{ToolchainConfig, WorkspaceLayout};
use crate::descriptor::{CoreDescriptor, ProjectDescriptor};
use crate::error::{RegressionError, Result};
use crate::image::{image_digest, ImageConverter};
use crate::invoke::run_tool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Build products for one (project, core) pair.
#[derive(Debug, Clone)]
pub struct SimulationArtifact {
    /// Project that was built.
    pub project: String,

    /// Core the image was prepared for.
    pub core: String,

    /// Linked ELF produced by the compiler.
    pub elf_path: PathBuf,

    /// Raw binary extracted from the ELF.
    pub binary_path: PathBuf,

    /// Simulator-loadable hex image.
    pub image_path: PathBuf,

    /// SHA-256 of the image contents; identical inputs must reproduce it.
    pub image_digest: String,
}

/// Memoization key. Extra build arguments participate so that two test
/// cases with different flags never share an artifact; with no extra
/// arguments this is exactly the (project, core) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BuildKey {
    project: String,
    core: String,
    build_args: Vec<String>,
}

type ArtifactCell = Arc<OnceCell<Arc<SimulationArtifact>>>;

/// Build pipeline with a per-run artifact cache.
pub struct BuildPipeline {
    layout: WorkspaceLayout,
    toolchain: ToolchainConfig,
    cache: Mutex<HashMap<BuildKey, ArtifactCell>>,
}

impl BuildPipeline {
    /// New pipeline over `layout` driving the tools in `toolchain`.
    pub fn new(layout: WorkspaceLayout, toolchain: ToolchainConfig) -> Self {
        Self {
            layout,
            toolchain,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build `project` for `core`, reusing a completed artifact when the
    /// same key was already built this run.
    pub async fn build(
        &self,
        project: &ProjectDescriptor,
        core: &CoreDescriptor,
        build_args: &[String],
    ) -> Result<Arc<SimulationArtifact>> {
        let key = BuildKey {
            project: project.name.clone(),
            core: core.name.clone(),
            build_args: build_args.to_vec(),
        };

        // The map lock is only held to fetch the cell; the build itself runs
        // under the cell so unrelated keys never serialize on each other.
        let cell = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(key).or_default())
        };

        cell.get_or_try_init(|| self.build_uncached(project, core, build_args))
            .await
            .map(Arc::clone)
    }

    async fn build_uncached(
        &self,
        project: &ProjectDescriptor,
        core: &CoreDescriptor,
        build_args: &[String],
    ) -> Result<Arc<SimulationArtifact>> {
        let target = project
            .target
            .as_deref()
            .unwrap_or(&self.toolchain.default_target);
        info!(project = %project.name, core = %core.name, target, "building firmware");

        let mut args: Vec<String> = vec![
            "build".to_string(),
            "--release".to_string(),
            "--target".to_string(),
            target.to_string(),
        ];
        args.extend(build_args.iter().cloned());

        let out = run_tool(
            &self.toolchain.compiler,
            &args,
            &project.dir,
            self.toolchain.build_timeout,
        )
        .await?;
        if !out.success() {
            return Err(RegressionError::Build {
                project: project.name.clone(),
                core: core.name.clone(),
                message: format!("compiler exited with code {}", out.exit_code),
                stderr: out.stderr,
            });
        }

        let elf_path = self.locate_elf(project, target)?;
        debug!(elf = %elf_path.display(), "located built ELF");

        let out_dir = self.layout.build_dir(&project.name, &core.name);
        tokio::fs::create_dir_all(&out_dir).await?;
        let binary_path = out_dir.join(format!("{}.bin", project.name));

        let objcopy_args = vec![
            "-O".to_string(),
            "binary".to_string(),
            elf_path.display().to_string(),
            binary_path.display().to_string(),
        ];
        let out = run_tool(
            &self.toolchain.objcopy,
            &objcopy_args,
            &project.dir,
            self.toolchain.build_timeout,
        )
        .await?;
        if !out.success() {
            return Err(RegressionError::Build {
                project: project.name.clone(),
                core: core.name.clone(),
                message: format!("objcopy exited with code {}", out.exit_code),
                stderr: out.stderr,
            });
        }

        let data = tokio::fs::read(&binary_path).await?;
        let converter = ImageConverter::for_layout(&core.memory);
        let image = converter.convert(
            &project.name,
            &core.name,
            &data,
            core.memory.size_bytes as usize,
        )?;
        let digest = image_digest(&image);

        let image_path = out_dir.join("image.hex");
        tokio::fs::write(&image_path, &image).await?;

        info!(
            project = %project.name,
            core = %core.name,
            bytes = data.len(),
            digest = %&digest[..12],
            "memory image ready"
        );

        Ok(Arc::new(SimulationArtifact {
            project: project.name.clone(),
            core: core.name.clone(),
            elf_path,
            binary_path,
            image_path,
            image_digest: digest,
        }))
    }

    /// Find the linked ELF under the project's target directory.
    ///
    /// Cargo names the binary after the package, which may differ from the
    /// directory name in hyphen/underscore spelling; try the plausible
    /// candidates plus the name declared in Cargo.toml.
    fn locate_elf(&self, project: &ProjectDescriptor, target: &str) -> Result<PathBuf> {
        let release_dir = project.dir.join("target").join(target).join("release");

        let mut candidates = vec![
            project.name.replace('-', "_"),
            project.name.clone(),
            project.name.replace('_', "-"),
        ];
        if let Ok(manifest) = std::fs::read_to_string(project.dir.join("Cargo.toml")) {
            let name_re = regex::Regex::new(r#"name\s*=\s*"([^"]+)""#).expect("static regex");
            if let Some(cap) = name_re.captures(&manifest) {
                let declared = cap[1].to_string();
                candidates.push(declared.replace('-', "_"));
                candidates.push(declared);
            }
        }

        for candidate in &candidates {
            let path = release_dir.join(candidate);
            if path.is_file() {
                return Ok(path);
            }
        }

        Err(RegressionError::Build {
            project: project.name.clone(),
            core: String::new(),
            message: format!(
                "built ELF not found under {} (tried {})",
                release_dir.display(),
                candidates.join(", ")
            ),
            stderr: String::new(),
        })
    }
}
