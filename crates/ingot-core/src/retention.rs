//! Garbage collection of repository entries and storage files.
//!
//! Retention never mutates anything. It returns a [`RetentionPlan`] listing
//! database entries to drop and files to delete, which the caller applies.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use ingot_schema::{PackageKey, TargetNaming};
use tracing::{debug, warn};

use crate::error::{Result, Warning};
use crate::repo::{LoadedRepository, RepositoryState};

/// Directed `dependent -> dependency` edges between active entries.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<PackageKey, Vec<PackageKey>>,
}

/// Strip a version qualifier such as `>=2.0` from a dependency string.
fn bare_identity(dep: &str) -> &str {
    dep.split(['<', '>', '=']).next().unwrap_or(dep).trim()
}

impl DependencyGraph {
    /// Build the graph from recorded dependency lists. Dependencies outside
    /// the naming scheme (the base runtime, system libraries) are not edges.
    pub fn from_state(state: &RepositoryState, naming: &TargetNaming) -> Self {
        let edges = state
            .iter()
            .map(|(key, record)| {
                let deps = record
                    .dependencies
                    .iter()
                    .map(|d| bare_identity(d))
                    .filter(|d| naming.belongs(d))
                    .filter_map(|d| naming.parse(d).ok())
                    .collect();
                (key.clone(), deps)
            })
            .collect();
        Self { edges }
    }

    /// Add or replace the outgoing edges of `key`.
    pub fn insert(&mut self, key: PackageKey, deps: Vec<PackageKey>) {
        self.edges.insert(key, deps);
    }

    /// Remove one edge, if present.
    pub fn remove_edge(&mut self, from: &PackageKey, to: &PackageKey) {
        if let Some(deps) = self.edges.get_mut(from) {
            deps.retain(|d| d != to);
        }
    }

    /// Every node reachable from `roots`, roots included.
    ///
    /// Reached keys that are not nodes of the graph are reported as
    /// [`Warning::MissingDependency`] and not traversed further.
    pub fn reachable<'k>(
        &self,
        roots: impl IntoIterator<Item = &'k PackageKey>,
    ) -> (BTreeSet<PackageKey>, Vec<Warning>) {
        let mut visited = BTreeSet::new();
        let mut warnings = Vec::new();
        let mut queue: VecDeque<PackageKey> = roots.into_iter().cloned().collect();

        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            match self.edges.get(&key) {
                Some(deps) => queue.extend(deps.iter().cloned()),
                None => {
                    warn!(%key, "missing dependency");
                    warnings.push(Warning::MissingDependency { key });
                }
            }
        }

        (visited, warnings)
    }
}

/// Removal lists produced by a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Database entries to drop.
    pub drop_entries: Vec<PackageKey>,
    /// Files in repository storage to delete.
    pub delete_files: Vec<PathBuf>,
    /// Problems found while traversing.
    pub warnings: Vec<Warning>,
}

impl RetentionPlan {
    /// True if there is nothing to remove.
    pub fn is_empty(&self) -> bool {
        self.drop_entries.is_empty() && self.delete_files.is_empty()
    }
}

/// Active keys not needed by the whitelist or by any head package.
///
/// Head packages are never unneeded themselves; they are roots.
pub fn unneeded_entries(
    state: &RepositoryState,
    whitelist: &[PackageKey],
    naming: &TargetNaming,
) -> (BTreeSet<PackageKey>, Vec<Warning>) {
    let graph = DependencyGraph::from_state(state, naming);
    let roots: Vec<&PackageKey> = whitelist
        .iter()
        .chain(state.keys().filter(|k| k.is_head()))
        .collect();
    let (needed, warnings) = graph.reachable(roots);

    let unneeded = state
        .keys()
        .filter(|k| !k.is_head() && !needed.contains(*k))
        .cloned()
        .collect();
    (unneeded, warnings)
}

/// Artifact and signature files in `storage_dir` that no active entry
/// references.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be listed.
pub fn orphan_files(
    storage_dir: &Path,
    state: &RepositoryState,
    artifact_extension: &str,
) -> Result<Vec<PathBuf>> {
    if !storage_dir.is_dir() {
        return Ok(Vec::new());
    }

    let expected: BTreeSet<String> = state
        .iter()
        .flat_map(|(_, r)| [r.filename.clone(), format!("{}.sig", r.filename)])
        .collect();
    let artifact_suffix = format!(".{artifact_extension}");
    let signature_suffix = format!(".{artifact_extension}.sig");

    let mut orphans = Vec::new();
    for entry in walkdir::WalkDir::new(storage_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let is_package_file = name.ends_with(&artifact_suffix) || name.ends_with(&signature_suffix);
        if is_package_file && !expected.contains(&*name) {
            orphans.push(entry.path().to_path_buf());
        }
    }
    orphans.sort();
    Ok(orphans)
}

/// Computes a [`RetentionPlan`] for one repository.
#[derive(Debug, Clone, Copy)]
pub struct RetentionAnalyzer<'a> {
    /// Target naming scheme.
    pub naming: &'a TargetNaming,
    /// Artifact file extension, without the leading dot.
    pub artifact_extension: &'a str,
}

impl RetentionAnalyzer<'_> {
    /// Run both sweeps.
    ///
    /// Dropped entries are the unneeded ones, every active entry that the
    /// base distribution now provides, and every yanked entry.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if repository storage cannot be listed.
    pub fn analyze(
        &self,
        repo: &LoadedRepository,
        whitelist: &[PackageKey],
        official: &BTreeSet<PackageKey>,
        storage_dir: &Path,
    ) -> Result<RetentionPlan> {
        let (mut dropped, warnings) = unneeded_entries(&repo.state, whitelist, self.naming);
        dropped.extend(repo.state.keys().filter(|k| official.contains(*k)).cloned());
        dropped.extend(repo.yanked.keys().cloned());

        let delete_files = orphan_files(storage_dir, &repo.state, self.artifact_extension)?;
        debug!(
            entries = dropped.len(),
            files = delete_files.len(),
            "retention plan computed"
        );

        Ok(RetentionPlan {
            drop_entries: dropped.into_iter().collect(),
            delete_files,
            warnings,
        })
    }
}
