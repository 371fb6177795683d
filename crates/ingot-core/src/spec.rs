//! Upstream package metadata.
//!
//! The analyzers and the planner are synchronous and pure; they read
//! metadata from a [`SpecCatalog`] that is filled beforehand, with bounded
//! concurrency, from a [`SpecSource`].

use std::collections::{BTreeSet, HashMap};

use futures::stream::{self, StreamExt};
use ingot_schema::{PackageName, Requirement, Sha256Hash, Version};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::io::{ArchiveManifest, SpecSource};

/// A runtime dependency declared by an upstream package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRequirement {
    /// Name of the required package.
    pub name: PackageName,
    /// Version constraint.
    pub requirement: Requirement,
    /// Whether the prerelease channel may satisfy the constraint.
    pub prerelease: bool,
}

impl DependencyRequirement {
    /// Create a requirement; prereleases are allowed iff the constraint names one.
    pub fn new(name: impl Into<PackageName>, requirement: Requirement) -> Self {
        let prerelease = requirement.is_prerelease();
        Self {
            name: name.into(),
            requirement,
            prerelease,
        }
    }
}

/// Metadata of one upstream package version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Package name.
    pub name: PackageName,
    /// Package version.
    pub version: Version,
    /// One-line description.
    #[serde(default)]
    pub summary: String,
    /// Project homepage.
    #[serde(default)]
    pub homepage: String,
    /// Declared licenses.
    #[serde(default)]
    pub licenses: Vec<String>,
    /// Declared runtime dependencies.
    #[serde(default)]
    pub runtime_dependencies: Vec<DependencyRequirement>,
    /// Installed executables.
    #[serde(default)]
    pub executables: Vec<String>,
    /// Whether native extensions are compiled at install time.
    #[serde(default)]
    pub has_extensions: bool,
    /// Shipped files.
    #[serde(default)]
    pub files: Vec<String>,
    /// Declared minimum runtime.
    #[serde(default)]
    pub required_runtime: Option<Requirement>,
    /// Content hash published by the registry.
    #[serde(default)]
    pub sha256: Option<Sha256Hash>,
}

impl PackageSpec {
    /// Overlay facts that are only known once the artifact itself is in hand.
    pub fn with_manifest(&self, manifest: &ArchiveManifest) -> Self {
        let mut merged = self.clone();
        if !manifest.executables.is_empty() {
            merged.executables.clone_from(&manifest.executables);
        }
        if !manifest.files.is_empty() {
            merged.files.clone_from(&manifest.files);
        }
        merged.has_extensions |= manifest.has_extensions;
        merged
    }

    /// Top-level files that look like license texts.
    pub fn license_files(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| !f.contains('/'))
            .filter(|f| {
                let lower = f.to_lowercase();
                lower.contains("license") || lower.contains("copying") || lower.contains("copyright")
            })
            .cloned()
            .collect()
    }
}

/// Request-scoped memo of fetched [`PackageSpec`]s.
#[derive(Debug, Default)]
pub struct SpecCatalog {
    specs: HashMap<(PackageName, Version), PackageSpec>,
}

impl SpecCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec, replacing any previous entry for the same version.
    pub fn insert(&mut self, spec: PackageSpec) {
        self.specs
            .insert((spec.name.clone(), spec.version.clone()), spec);
    }

    /// Whether metadata for `name` at `version` is loaded.
    pub fn contains(&self, name: &PackageName, version: &Version) -> bool {
        self.specs.contains_key(&(name.clone(), version.clone()))
    }

    /// Look up previously loaded metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingSpec`] if it was never loaded.
    pub fn get(&self, name: &PackageName, version: &Version) -> Result<&PackageSpec> {
        self.specs
            .get(&(name.clone(), version.clone()))
            .ok_or_else(|| EngineError::MissingSpec {
                name: name.clone(),
                version: version.clone(),
            })
    }

    /// Number of loaded specs.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True if nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Load every wanted `(name, version)` that is not already present.
    ///
    /// At most `concurrency` requests are in flight at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::External`] for the first failed fetch.
    pub async fn prefetch(
        &mut self,
        source: &dyn SpecSource,
        wanted: impl IntoIterator<Item = (PackageName, Version)>,
        concurrency: usize,
    ) -> Result<()> {
        let missing: BTreeSet<(PackageName, Version)> = wanted
            .into_iter()
            .filter(|(name, version)| !self.contains(name, version))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        debug!(count = missing.len(), "fetching upstream metadata");

        let results: Vec<_> = stream::iter(missing)
            .map(|(name, version)| async move {
                source
                    .fetch_spec(&name, &version)
                    .await
                    .map_err(|e| EngineError::external("metadata fetch", &e.context(format!("{name} {version}"))))
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for result in results {
            self.insert(result?);
        }
        Ok(())
    }
}
