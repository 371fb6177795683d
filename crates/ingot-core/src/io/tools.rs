//! Process-backed adapters: signing, the repository database tool, the build
//! chroot and the public mirror.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::io::{MirrorSync, RepositoryDatabase, SandboxSync, Signer};

/// Resolve `program` on `PATH`, failing with a readable message.
pub(crate) fn require(program: &str) -> anyhow::Result<PathBuf> {
    which::which(program).with_context(|| format!("{program} not found in PATH"))
}

/// Run `cmd` to completion; a non-zero exit becomes an error carrying stderr.
pub(crate) async fn run(mut cmd: Command, what: &str) -> anyhow::Result<()> {
    debug!(?cmd, "running {what}");
    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to spawn {what}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{what} exited with {}: {}", output.status, stderr.trim());
    }
    Ok(())
}

/// Detached GPG signatures, written next to the artifact as `<file>.sig`.
#[derive(Debug, Clone, Default)]
pub struct GpgSigner {
    key: Option<String>,
}

impl GpgSigner {
    /// Sign with `key`, or gpg's default key.
    pub fn new(key: Option<String>) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Signer for GpgSigner {
    async fn sign(&self, artifact: &Path) -> anyhow::Result<PathBuf> {
        let mut signature = artifact.as_os_str().to_owned();
        signature.push(".sig");
        let signature = PathBuf::from(signature);

        let mut cmd = Command::new(require("gpg")?);
        cmd.args(["--batch", "--yes", "--detach-sign", "--use-agent"]);
        if let Some(key) = &self.key {
            cmd.arg("--local-user").arg(key);
        }
        cmd.arg("--output").arg(&signature).arg(artifact);
        run(cmd, "gpg").await?;
        Ok(signature)
    }
}

/// `repo-add` / `repo-remove` against one database file.
#[derive(Debug, Clone)]
pub struct RepoTool {
    db_file: PathBuf,
}

impl RepoTool {
    /// Operate on `db_file`, e.g. `index/quarry.db.tar.xz`.
    pub fn new(db_file: impl Into<PathBuf>) -> Self {
        Self {
            db_file: db_file.into(),
        }
    }
}

#[async_trait]
impl RepositoryDatabase for RepoTool {
    async fn extract(&self, dest: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(dest).await?;
        if !self.db_file.exists() {
            debug!(db = %self.db_file.display(), "no database yet");
            return Ok(());
        }
        let mut cmd = Command::new(require("tar")?);
        cmd.arg("-xf").arg(&self.db_file).arg("-C").arg(dest);
        run(cmd, "tar").await
    }

    async fn add_entry(&self, artifact: &Path) -> anyhow::Result<()> {
        let mut cmd = Command::new(require("repo-add")?);
        cmd.arg(&self.db_file).arg(artifact);
        run(cmd, "repo-add").await
    }

    async fn remove_entries(&self, identities: &[String]) -> anyhow::Result<()> {
        if identities.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new(require("repo-remove")?);
        cmd.arg(&self.db_file).args(identities);
        run(cmd, "repo-remove").await
    }
}

/// Refreshes the package database inside the build chroot.
#[derive(Debug, Clone)]
pub struct ChrootSync {
    chroot_dir: PathBuf,
}

impl ChrootSync {
    /// Sync the chroot rooted at `chroot_dir` (its working copy is `root/`).
    pub fn new(chroot_dir: impl Into<PathBuf>) -> Self {
        Self {
            chroot_dir: chroot_dir.into(),
        }
    }
}

#[async_trait]
impl SandboxSync for ChrootSync {
    async fn sync(&self, storage_dir: &Path) -> anyhow::Result<()> {
        let mut bind = std::ffi::OsString::from("--bind-ro=");
        bind.push(storage_dir);
        let mut cmd = Command::new(require("arch-nspawn")?);
        cmd.arg(self.chroot_dir.join("root"))
            .arg(bind)
            .args(["pacman", "-Sy", "--noconfirm"]);
        run(cmd, "arch-nspawn").await
    }
}

/// Pushes the repository to an rsync destination.
#[derive(Debug, Clone)]
pub struct RsyncMirror {
    destination: String,
    exclude: String,
}

impl RsyncMirror {
    /// Mirror to `destination`; `db_file_name` is the database whose `.old`
    /// backup is never uploaded.
    pub fn new(destination: &str, db_file_name: &str) -> Self {
        Self {
            destination: destination.to_string(),
            exclude: format!("{db_file_name}.old"),
        }
    }
}

#[async_trait]
impl MirrorSync for RsyncMirror {
    async fn publish(&self, repo_dir: &Path, marker: &Path) -> anyhow::Result<()> {
        let mut source = repo_dir.as_os_str().to_owned();
        source.push("/");
        let mut cmd = Command::new(require("rsync")?);
        cmd.args(["-avz", "--delete-after", "--exclude"]).arg(&self.exclude);
        if let Some(name) = marker.file_name() {
            cmd.arg("--exclude").arg(name);
        }
        cmd.arg(source).arg(&self.destination);
        run(cmd, "rsync").await?;

        // The marker goes last so clients never see it ahead of the packages.
        let mut cmd = Command::new(require("rsync")?);
        cmd.arg("-az").arg(marker).arg(&self.destination);
        run(cmd, "rsync").await
    }
}
