//! End-of-run publication.
//!
//! The last-update marker is an integer number of seconds. It is derived
//! from the database's modification time but never moves backwards, so
//! mirrors polling it always see a strictly larger value after a change.

use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::io::MirrorSync;
use crate::paths::Layout;

/// Next marker value: the database timestamp, or one past the previous
/// marker if that is not already smaller.
pub fn next_marker(db_mtime: u64, previous: Option<u64>) -> u64 {
    match previous {
        Some(prev) if prev >= db_mtime => prev + 1,
        _ => db_mtime,
    }
}

/// Read a marker file, treating a missing or malformed file as absent.
fn read_marker(path: &Path) -> Option<u64> {
    let content = std::fs::read_to_string(path).ok()?;
    match content.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(path = %path.display(), "ignoring malformed update marker");
            None
        }
    }
}

fn mtime_secs(path: &Path) -> Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs()))
}

/// Writes the update marker and pushes the repository to its mirror.
pub struct PublishCoordinator<'a> {
    layout: &'a Layout,
    mirror: Option<&'a dyn MirrorSync>,
}

impl fmt::Debug for PublishCoordinator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishCoordinator")
            .field("layout", &self.layout)
            .field("mirror", &self.mirror.is_some())
            .finish()
    }
}

impl<'a> PublishCoordinator<'a> {
    /// Publish `layout`; with no mirror only the marker is written.
    pub fn new(layout: &'a Layout, mirror: Option<&'a dyn MirrorSync>) -> Self {
        Self { layout, mirror }
    }

    /// Finish a run that published `builds` artifacts.
    ///
    /// Returns the new marker, or `None` when nothing was built and
    /// therefore nothing was written or pushed.
    ///
    /// # Errors
    ///
    /// Fails if the database is missing, the marker cannot be written, or
    /// the mirror push fails.
    pub async fn finish(&self, builds: usize) -> Result<Option<u64>> {
        if builds == 0 {
            info!("no packages built; skipping publish");
            return Ok(None);
        }

        let marker_path = self.layout.marker_file();
        let marker = next_marker(
            mtime_secs(&self.layout.db_file())?,
            read_marker(&marker_path),
        );
        std::fs::write(&marker_path, format!("{marker}\n"))?;
        info!(marker, "update marker written");

        if let Some(mirror) = self.mirror {
            mirror
                .publish(self.layout.storage_dir(), &marker_path)
                .await
                .map_err(|e| EngineError::external("mirror sync", &e))?;
        }
        Ok(Some(marker))
    }
}
