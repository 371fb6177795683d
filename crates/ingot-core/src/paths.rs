use std::path::{Path, PathBuf};

use crate::config::Settings;

/// On-disk layout of one repository and its scratch space.
#[derive(Debug, Clone)]
pub struct Layout {
    index_dir: PathBuf,
    work_dir: PathBuf,
    repo_name: String,
}

impl Layout {
    /// Layout rooted at explicit directories.
    pub fn new(index_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>, repo_name: &str) -> Self {
        Self {
            index_dir: index_dir.into(),
            work_dir: work_dir.into(),
            repo_name: repo_name.to_string(),
        }
    }

    /// Layout described by `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.index_dir, &settings.work_dir, &settings.repo_name)
    }

    /// Repository storage: artifacts, signatures, database.
    pub fn storage_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Repository database: `<index>/<repo>.db.tar.xz`
    pub fn db_file(&self) -> PathBuf {
        self.index_dir.join(format!("{}.db.tar.xz", self.repo_name))
    }

    /// Last-update marker: `<index>/lastupdate`
    pub fn marker_file(&self) -> PathBuf {
        self.index_dir.join("lastupdate")
    }

    /// Scratch root, wiped at the start of each run.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Unpacked descriptor set: `<work>/repo`
    pub fn extracted_db_dir(&self) -> PathBuf {
        self.work_dir.join("repo")
    }

    /// Downloaded upstream artifacts: `<work>/downloads`
    pub fn download_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    /// Build directory for one identity: `<work>/build/<identity>`
    pub fn build_dir(&self, identity: &str) -> PathBuf {
        self.work_dir.join("build").join(identity)
    }

    /// Timestamped build log for one identity.
    pub fn build_log(&self, identity: &str, version: &str) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        self.work_dir
            .join("logs")
            .join(format!("build-{identity}-{version}-{timestamp}.log"))
    }

    /// Remove and recreate the scratch root.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be removed or created.
    pub fn reset_work_dir(&self) -> std::io::Result<()> {
        if self.work_dir.exists() {
            std::fs::remove_dir_all(&self.work_dir)?;
        }
        std::fs::create_dir_all(&self.work_dir)?;
        std::fs::create_dir_all(&self.index_dir)
    }
}
