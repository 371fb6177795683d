//! Run configuration loaded from `ingot.toml`.
//!
//! Every field has a default, so an empty file (or none at all) describes a
//! working `ruby-` mirror in the current directory. Relative paths are
//! resolved against the directory holding the config file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ingot_schema::{PackageName, TargetNaming, Version};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "INGOT_CONFIG";

/// Default config file name.
pub const CONFIG_FILE: &str = "ingot.toml";

/// Deserialized `ingot.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Repository name; the database is `<repo_name>.db.tar.xz`.
    pub repo_name: String,
    /// Prefix of every target identity.
    pub target_prefix: String,
    /// Identity every generated package depends on.
    pub base_dependency: String,
    /// Architecture of packages with native extensions.
    pub target_arch: String,
    /// Artifact file extension, without the leading dot.
    pub artifact_extension: String,
    /// Upstream platforms accepted from the registry snapshot.
    pub platforms: Vec<String>,
    /// Runtime version checked against each version's declared minimum.
    pub runtime_version: Option<String>,
    /// Packages whose executables clash with other packages.
    pub conflicting_names: BTreeSet<String>,
    /// Repository storage directory (artifacts, signatures, database).
    pub index_dir: PathBuf,
    /// Scratch space for builds; wiped at the start of each run.
    pub work_dir: PathBuf,
    /// Per-package overrides.
    pub config_pkg_dir: PathBuf,
    /// Pre-parsed registry index (`stable.json`, `prerelease.json`).
    pub snapshot_dir: PathBuf,
    /// Base URL of the registry metadata API.
    pub spec_endpoint: String,
    /// Base URL artifacts are downloaded from.
    pub download_endpoint: String,
    /// Packages that must be present.
    pub whitelist: PathBuf,
    /// Packages rebuilt on every run.
    pub rebuild_list: PathBuf,
    /// Packages never built.
    pub ignore_list: PathBuf,
    /// Identities provided by the base distribution.
    pub official_list: PathBuf,
    /// rsync destination of the public mirror; publishing is skipped when unset.
    pub mirror_destination: Option<String>,
    /// Build sandbox root.
    pub chroot_dir: PathBuf,
    /// Directory packages install into on the target system.
    pub gem_dir: String,
    /// Directory compiled extensions install into on the target system.
    pub extension_dir: String,
    /// GPG key used to sign artifacts; the default key when unset.
    pub signing_key: Option<String>,
    /// Upper bound on concurrent metadata requests.
    pub fetch_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_name: "quarry".to_string(),
            target_prefix: "ruby-".to_string(),
            base_dependency: "ruby".to_string(),
            target_arch: "x86_64".to_string(),
            artifact_extension: "pkg.tar.xz".to_string(),
            platforms: vec!["ruby".to_string()],
            runtime_version: None,
            conflicting_names: ["rdoc", "rake", "minitest", "test-unit"]
                .into_iter()
                .map(String::from)
                .collect(),
            index_dir: PathBuf::from("index"),
            work_dir: PathBuf::from("work"),
            config_pkg_dir: PathBuf::from("config.pkg"),
            snapshot_dir: PathBuf::from("snapshot"),
            spec_endpoint: "https://rubygems.org".to_string(),
            download_endpoint: "https://rubygems.org/downloads".to_string(),
            whitelist: PathBuf::from("whitelist_packages"),
            rebuild_list: PathBuf::from("rebuild_packages"),
            ignore_list: PathBuf::from("ignored_packages"),
            official_list: PathBuf::from("official_packages"),
            mirror_destination: None,
            chroot_dir: PathBuf::from("chroot"),
            gem_dir: "/usr/lib/ruby/gems/3.3.0".to_string(),
            extension_dir: "/usr/lib/ruby/gems/3.3.0/extensions/x86_64-linux/3.3.0".to_string(),
            signing_key: None,
            fetch_concurrency: 8,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text, resolving paths against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for invalid TOML, unknown keys, or
    /// nonsensical values.
    pub fn from_toml(content: &str, base_dir: &Path) -> Result<Self> {
        let mut settings: Self =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        settings.validate()?;
        settings.rebase(base_dir);
        Ok(settings)
    }

    /// Load settings from `path`; a missing file yields the defaults rooted
    /// at its directory.
    ///
    /// # Errors
    ///
    /// See [`Self::from_toml`].
    pub fn load(path: &Path) -> Result<Self> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        if !path.exists() {
            let mut settings = Self::default();
            settings.rebase(base_dir);
            return Ok(settings);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content, base_dir)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    /// Config file location: `$INGOT_CONFIG`, else `ingot.toml` in the
    /// working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from)
    }

    fn validate(&self) -> Result<()> {
        if self.target_prefix.is_empty() {
            return Err(EngineError::Config("target_prefix must not be empty".into()));
        }
        if self.repo_name.is_empty() {
            return Err(EngineError::Config("repo_name must not be empty".into()));
        }
        if self.fetch_concurrency == 0 {
            return Err(EngineError::Config("fetch_concurrency must be at least 1".into()));
        }
        Ok(())
    }

    fn rebase(&mut self, base_dir: &Path) {
        for path in [
            &mut self.index_dir,
            &mut self.work_dir,
            &mut self.config_pkg_dir,
            &mut self.snapshot_dir,
            &mut self.whitelist,
            &mut self.rebuild_list,
            &mut self.ignore_list,
            &mut self.official_list,
            &mut self.chroot_dir,
        ] {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }

    /// The naming scheme of the target repository.
    pub fn naming(&self) -> TargetNaming {
        TargetNaming::new(&self.target_prefix)
    }

    /// The runtime version as a [`Version`].
    pub fn runtime(&self) -> Option<Version> {
        self.runtime_version.as_deref().map(Version::new)
    }

    /// Whether `name` ships executables that clash with other packages.
    pub fn is_conflicting(&self, name: &PackageName) -> bool {
        self.conflicting_names.contains(name.as_str())
    }
}
