//! External collaborators.
//!
//! The engine never spawns processes or touches the network directly; it
//! talks to these traits. Production adapters live in the submodules, tests
//! substitute in-memory fakes.

pub mod download;
pub mod snapshot;
pub mod tools;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ingot_schema::{Channel, PackageName, Sha256Hash, Version};

use crate::descriptor::DescriptorParams;
use crate::index::ChannelListing;
use crate::spec::PackageSpec;

pub use download::{HttpFetcher, HttpSpecSource};
pub use snapshot::JsonIndexLoader;
pub use tools::{ChrootSync, GpgSigner, RepoTool, RsyncMirror};

/// Loads one channel of the registry index, pre-filtered to the current platform.
#[async_trait]
pub trait IndexLoader: Send + Sync {
    /// Return `name -> versions` for `channel`.
    async fn load_channel(&self, channel: Channel) -> anyhow::Result<ChannelListing>;
}

/// Provides upstream package metadata for one published version.
#[async_trait]
pub trait SpecSource: Send + Sync {
    /// Fetch the metadata of `name` at `version`.
    async fn fetch_spec(&self, name: &PackageName, version: &Version)
    -> anyhow::Result<PackageSpec>;
}

/// Facts read from inside a fetched upstream artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveManifest {
    /// Version embedded in the artifact.
    pub version: Version,
    /// Executables the package installs.
    pub executables: Vec<String>,
    /// Whether the package compiles native extensions.
    pub has_extensions: bool,
    /// Files shipped in the package.
    pub files: Vec<String>,
}

/// A downloaded upstream artifact.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    /// Local path of the downloaded file.
    pub path: PathBuf,
    /// SHA256 of the downloaded file.
    pub sha256: Sha256Hash,
    /// Metadata embedded in the artifact.
    pub manifest: ArchiveManifest,
}

/// Downloads upstream artifacts.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `name` at `version` into `dest_dir`.
    async fn fetch(
        &self,
        name: &PackageName,
        version: &Version,
        dest_dir: &Path,
    ) -> anyhow::Result<FetchedArtifact>;
}

/// Renders the build descriptor text for one package.
pub trait DescriptorRenderer: Send + Sync {
    /// Render `params` into descriptor text.
    fn render(&self, params: &DescriptorParams) -> anyhow::Result<String>;
}

/// Everything the sandboxed builder needs for one build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    /// Directory the build runs in; the produced artifact must appear here.
    pub work_dir: &'a Path,
    /// Rendered build descriptor.
    pub descriptor: &'a str,
    /// Upstream artifact to package.
    pub source: &'a Path,
    /// Optional patch applied before packaging.
    pub patch: Option<&'a Path>,
    /// Where build output is logged.
    pub log_path: &'a Path,
}

/// Runs one build inside the sandbox.
#[async_trait]
pub trait SandboxBuilder: Send + Sync {
    /// Build `request`. Success means the build command exited cleanly; the
    /// executor separately checks that the expected artifact exists.
    async fn build(&self, request: &BuildRequest<'_>) -> anyhow::Result<()>;
}

/// Produces detached signatures.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `artifact`, returning the path of the signature file.
    async fn sign(&self, artifact: &Path) -> anyhow::Result<PathBuf>;
}

/// The repository database tool.
#[async_trait]
pub trait RepositoryDatabase: Send + Sync {
    /// Unpack the descriptor set into `dest` for [`crate::repo::RepositoryState::load`].
    async fn extract(&self, dest: &Path) -> anyhow::Result<()>;

    /// Register a published artifact.
    async fn add_entry(&self, artifact: &Path) -> anyhow::Result<()>;

    /// Drop entries by target identity.
    async fn remove_entries(&self, identities: &[String]) -> anyhow::Result<()>;
}

/// Keeps the build sandbox's view of the repository current.
#[async_trait]
pub trait SandboxSync: Send + Sync {
    /// Make everything in `storage_dir` visible to the next build.
    async fn sync(&self, storage_dir: &Path) -> anyhow::Result<()>;
}

/// Pushes the finished repository to its public mirror.
#[async_trait]
pub trait MirrorSync: Send + Sync {
    /// Publish `repo_dir` together with the update `marker`.
    async fn publish(&self, repo_dir: &Path, marker: &Path) -> anyhow::Result<()>;
}
