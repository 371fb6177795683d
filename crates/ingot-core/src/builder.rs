//! Sandboxed package builds.
//!
//! A build runs in its own work directory: the rendered `PKGBUILD`, the
//! upstream artifact and the optional patch are placed there and the build
//! command is started with that directory as its working directory. Output
//! goes to a per-build log file; on failure the tail of the log is attached
//! to the error.
//!
//! ## Environment contract
//!
//! | Variable | Value |
//! |---|---|
//! | `PKGDEST` | The work directory, so the artifact lands next to the `PKGBUILD` |
//! | `SRCDEST` | The work directory |
//! | `LANG` | `C.UTF-8` |

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::io::{BuildRequest, SandboxBuilder};

/// Name of the descriptor file inside the work directory.
pub const DESCRIPTOR_FILE: &str = "PKGBUILD";

/// Lines of build output attached to a failure.
const LOG_TAIL_LINES: usize = 20;

/// Runs `makechrootpkg` (or plain `makepkg`) for one package.
#[derive(Debug, Clone)]
pub struct MakepkgBuilder {
    program: OsString,
    args: Vec<OsString>,
}

impl MakepkgBuilder {
    /// Build in a clean copy of the chroot at `chroot_dir`, with `repo_dir`
    /// bind-mounted so freshly built dependencies resolve.
    pub fn chroot(chroot_dir: &Path, repo_dir: &Path) -> Self {
        Self {
            program: "makechrootpkg".into(),
            args: vec![
                "-c".into(),
                "-r".into(),
                chroot_dir.into(),
                "-D".into(),
                repo_dir.into(),
            ],
        }
    }

    /// Build directly on the host.
    pub fn host() -> Self {
        Self {
            program: "makepkg".into(),
            args: vec!["--noconfirm".into(), "--syncdeps".into(), "--force".into()],
        }
    }

    /// Run an arbitrary command in the work directory.
    pub fn command(program: impl Into<OsString>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(OsString::from).collect(),
        }
    }

    fn stage(request: &BuildRequest<'_>) -> Result<()> {
        let work_dir = request.work_dir;
        std::fs::create_dir_all(work_dir)
            .with_context(|| format!("Failed to create {}", work_dir.display()))?;
        std::fs::write(work_dir.join(DESCRIPTOR_FILE), request.descriptor)
            .context("Failed to write build descriptor")?;

        for input in std::iter::once(request.source).chain(request.patch) {
            let name = input
                .file_name()
                .with_context(|| format!("{} has no file name", input.display()))?;
            let dest = work_dir.join(name);
            if dest != input {
                std::fs::copy(input, &dest)
                    .with_context(|| format!("Failed to copy {}", input.display()))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxBuilder for MakepkgBuilder {
    async fn build(&self, request: &BuildRequest<'_>) -> Result<()> {
        Self::stage(request)?;

        let log_path = request.log_path;
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_file = std::fs::File::create(log_path).context("Failed to create build log file")?;

        info!(dir = %request.work_dir.display(), log = %log_path.display(), "building");
        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(request.work_dir)
            .env("PKGDEST", request.work_dir)
            .env("SRCDEST", request.work_dir)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .status()
            .await
            .with_context(|| format!("Failed to execute {}", self.program.to_string_lossy()))?;

        if !status.success() {
            let tail = read_last_lines(log_path, LOG_TAIL_LINES).unwrap_or_default();
            anyhow::bail!(
                "Build failed with exit code {:?}; last lines:\n{tail}\nFull log: {}",
                status.code(),
                log_path.display()
            );
        }
        Ok(())
    }
}

/// Read the last `n` lines of a file without loading all of it.
fn read_last_lines(path: &Path, n: usize) -> Result<String> {
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom};

    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // Seeked mid-file: drop the partial first line.
    let content = if seek_pos > 0 {
        buffer.find('\n').map_or(&*buffer, |idx| &buffer[idx + 1..])
    } else {
        &*buffer
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}
