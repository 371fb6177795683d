//! Runs the build queue.
//!
//! Keys are built strictly one after another: every build shares the
//! sandbox, and the sandbox must see each published artifact before the
//! next dependent build starts. The first failure aborts the run; whatever
//! was published before it stays published.

use std::fmt;
use std::path::{Path, PathBuf};

use ingot_schema::{PackageKey, Version};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::descriptor::{DescriptorInputs, DescriptorParams, DescriptorSettings};
use crate::error::{EngineError, Result};
use crate::io::{
    BuildRequest, DescriptorRenderer, Fetcher, RepositoryDatabase, SandboxBuilder, SandboxSync,
    Signer,
};
use crate::paths::Layout;
use crate::repo::RepositoryState;
use crate::reporter::Reporter;

/// External tools one build goes through.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Downloads upstream artifacts.
    pub fetcher: &'a dyn Fetcher,
    /// Renders build descriptors.
    pub renderer: &'a dyn DescriptorRenderer,
    /// Runs the sandboxed build.
    pub builder: &'a dyn SandboxBuilder,
    /// Signs produced artifacts.
    pub signer: &'a dyn Signer,
    /// Repository database tool.
    pub database: &'a dyn RepositoryDatabase,
    /// Refreshes the sandbox after each publish; `None` when builds run
    /// without a sandbox.
    pub sandbox: Option<&'a dyn SandboxSync>,
}

impl fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("sandbox", &self.sandbox.is_some())
            .finish_non_exhaustive()
    }
}

/// One published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
    /// Package identity.
    pub key: PackageKey,
    /// Target identity.
    pub identity: String,
    /// Upstream version.
    pub version: Version,
    /// Revision stored for this build.
    pub build_revision: u32,
    /// Artifact file name in repository storage.
    pub filename: String,
}

/// Coordinates fetch, build, sign and publish for each queued key.
pub struct BuildExecutor<'a> {
    ctx: RunContext<'a>,
    layout: &'a Layout,
    settings: DescriptorSettings<'a>,
    tools: Collaborators<'a>,
    reporter: &'a dyn Reporter,
}

impl fmt::Debug for BuildExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildExecutor")
            .field("layout", &self.layout)
            .field("settings", &self.settings)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl<'a> BuildExecutor<'a> {
    /// An executor publishing into `layout`.
    pub fn new(
        ctx: RunContext<'a>,
        layout: &'a Layout,
        settings: DescriptorSettings<'a>,
        tools: Collaborators<'a>,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            ctx,
            layout,
            settings,
            tools,
            reporter,
        }
    }

    /// Build every key of `order`, front to back, recording each success in
    /// `state`.
    ///
    /// # Errors
    ///
    /// Stops at the first failing key. Keys built before it are already in
    /// storage, in the database and in `state`.
    pub async fn execute(
        &self,
        state: &mut RepositoryState,
        order: &[PackageKey],
    ) -> Result<Vec<BuiltPackage>> {
        let mut built = Vec::with_capacity(order.len());
        for (i, key) in order.iter().enumerate() {
            let package = self.build_one(state, key, i + 1, order.len()).await?;
            built.push(package);
        }
        Ok(built)
    }

    async fn build_one(
        &self,
        state: &mut RepositoryState,
        key: &PackageKey,
        position: usize,
        total: usize,
    ) -> Result<BuiltPackage> {
        let version = self.ctx.resolver().latest_in_slot(key)?;
        let identity = self.ctx.naming.identity(key);
        self.reporter.building(&identity, &version, position, total);
        info!(%key, %version, "building {identity}");

        let spec = self.ctx.catalog.get(&key.name, &version)?;
        let artifact = self
            .tools
            .fetcher
            .fetch(&key.name, &version, &self.layout.download_dir())
            .await
            .map_err(|e| EngineError::external("fetch", &e))?;

        if artifact.manifest.version != version {
            return Err(EngineError::VersionMismatch {
                name: key.name.clone(),
                expected: version,
                actual: artifact.manifest.version,
            });
        }
        if let Some(expected) = spec.sha256.as_ref().filter(|h| !h.matches(&artifact.sha256)) {
            return Err(EngineError::ChecksumMismatch {
                name: key.name.clone(),
                version,
                expected: expected.to_string(),
                actual: artifact.sha256.to_string(),
            });
        }

        let spec = spec.with_manifest(&artifact.manifest);
        let build_revision = state.next_revision(key, &version);
        let dependencies = self.ctx.dependency_list(key, &spec)?;
        let patch = self.ctx.configs.patch(&key.name);
        let params = DescriptorParams::compute(
            &DescriptorInputs {
                key,
                identity: &identity,
                spec: &spec,
                build_revision,
                dependencies: &dependencies,
                config: self.ctx.configs.lookup(key),
                patch,
                source_sha256: &artifact.sha256,
            },
            &self.settings,
        );
        let descriptor = self
            .tools
            .renderer
            .render(&params)
            .map_err(|e| EngineError::external("descriptor render", &e))?;

        let work_dir = self.layout.build_dir(&identity);
        let log_path = self.layout.build_log(&identity, version.as_str());
        self.tools
            .builder
            .build(&BuildRequest {
                work_dir: &work_dir,
                descriptor: &descriptor,
                source: &artifact.path,
                patch: patch.map(|p| p.path.as_path()),
                log_path: &log_path,
            })
            .await
            .map_err(|e| EngineError::BuildFailure(format!("{identity}: {e:#}")))?;

        let produced = work_dir.join(&params.artifact_filename);
        if !produced.is_file() {
            return Err(EngineError::BuildFailure(params.artifact_filename));
        }

        let signature = self
            .tools
            .signer
            .sign(&produced)
            .await
            .map_err(|e| EngineError::external("sign", &e))?;

        let storage = self.layout.storage_dir();
        let stored = move_into(&produced, storage)?;
        move_into(&signature, storage)?;

        self.tools
            .database
            .add_entry(&stored)
            .await
            .map_err(|e| EngineError::external("repository database update", &e))?;
        let build_revision = state.record_build(
            key,
            &version,
            dependencies,
            params.artifact_filename.clone(),
        );

        if let Some(sandbox) = self.tools.sandbox {
            sandbox
                .sync(storage)
                .await
                .map_err(|e| EngineError::external("sandbox sync", &e))?;
        }

        self.reporter.built(&identity, &version, build_revision);
        Ok(BuiltPackage {
            key: key.clone(),
            identity,
            version,
            build_revision,
            filename: params.artifact_filename,
        })
    }
}

/// Move `file` into `dir`, keeping its name.
///
/// Rename is tried first; across filesystems the file is copied and the
/// original removed.
fn move_into(file: &Path, dir: &Path) -> Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        EngineError::BuildFailure(format!("{} has no file name", file.display()))
    })?;
    let dest = dir.join(name);
    std::fs::create_dir_all(dir)?;
    if std::fs::rename(file, &dest).is_err() {
        std::fs::copy(file, &dest)?;
        std::fs::remove_file(file)?;
    }
    debug!(from = %file.display(), to = %dest.display(), "moved into storage");
    Ok(dest)
}
