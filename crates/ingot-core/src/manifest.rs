//! Per-package build overrides from `config.pkg/`.
//!
//! `<name>.toml` applies to every slot of a package; `<name>-<slot>.toml`
//! narrows it. Lookup walks the slot ladder from most to least specific and
//! falls back to the bare name. A `<name>.patch` next to them is applied
//! before packaging.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ingot_schema::{PackageKey, PackageName, Sha256Hash};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Overrides for one package, parsed from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageConfig {
    /// Extra target identities, placed ahead of the generated dependencies.
    pub dependencies: Vec<String>,
    /// Extra directories preserved in addition to `bin` and `lib`.
    pub include: Vec<String>,
    /// Files renamed while packaging, `from -> to`.
    pub rename: BTreeMap<String, String>,
    /// Extra arguments for the package installer.
    pub install_args: Vec<String>,
    /// License list used when upstream declares none.
    pub licenses: Vec<String>,
}

/// A patch applied before packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    /// Location on disk.
    pub path: PathBuf,
    /// Content hash passed to the descriptor.
    pub sha256: Sha256Hash,
}

/// Every override file in `config.pkg/`, loaded up front.
#[derive(Debug, Clone, Default)]
pub struct PackageConfigs {
    configs: HashMap<String, PackageConfig>,
    patches: HashMap<String, PatchFile>,
}

impl PackageConfigs {
    /// No overrides at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `*.toml` and `*.patch` file in `dir`. A missing directory
    /// yields no overrides.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for a file that does not parse.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut loaded = Self::default();
        if !dir.is_dir() {
            return Ok(loaded);
        }

        for entry in walkdir::WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };

            match ext {
                "toml" => {
                    let content = std::fs::read_to_string(path)?;
                    let config: PackageConfig = toml::from_str(&content).map_err(|e| {
                        EngineError::Config(format!("{}: {e}", path.display()))
                    })?;
                    loaded.configs.insert(stem.to_string(), config);
                }
                "patch" => {
                    let sha256 = Sha256Hash::compute_file(path)?;
                    loaded.patches.insert(
                        stem.to_string(),
                        PatchFile {
                            path: path.to_path_buf(),
                            sha256,
                        },
                    );
                }
                _ => {}
            }
        }

        debug!(
            configs = loaded.configs.len(),
            patches = loaded.patches.len(),
            "loaded package overrides"
        );
        Ok(loaded)
    }

    /// Register an override directly.
    pub fn insert(&mut self, file_stem: &str, config: PackageConfig) {
        self.configs.insert(file_stem.to_string(), config);
    }

    /// The most specific override for `key`.
    pub fn lookup(&self, key: &PackageKey) -> Option<&PackageConfig> {
        key.slot
            .iter()
            .flat_map(|slot| slot.ladder())
            .map(|s| format!("{}-{s}", key.name))
            .chain(std::iter::once(key.name.to_string()))
            .find_map(|stem| self.configs.get(&stem))
    }

    /// The patch registered for `name`.
    pub fn patch(&self, name: &PackageName) -> Option<&PatchFile> {
        self.patches.get(name.as_str())
    }
}
