//! Detection of published packages that need rebuilding.

use std::collections::BTreeSet;

use ingot_schema::{PackageKey, PackageName, Version};
use tracing::debug;

use crate::context::RunContext;
use crate::error::Result;
use crate::repo::{PackageRecord, RepositoryState};

/// Keys flagged by [`analyze`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessReport {
    /// A newer upstream version exists inside the key's slot.
    pub outdated: Vec<PackageKey>,
    /// Same version, but the generated dependency list differs from the
    /// recorded one.
    pub changed: Vec<PackageKey>,
}

/// Whether a newer version than the recorded one exists in `key`'s slot.
///
/// # Errors
///
/// Returns [`crate::EngineError::Resolution`] if the slot is empty upstream.
pub fn outdated(ctx: &RunContext<'_>, key: &PackageKey, record: &PackageRecord) -> Result<bool> {
    let latest = ctx.resolver().latest_in_slot(key)?;
    Ok(latest != record.version)
}

/// Whether regenerating the dependency list for the recorded version gives
/// a different set than the one recorded.
///
/// # Errors
///
/// Returns [`crate::EngineError::MissingSpec`] if the recorded version's
/// metadata was not prefetched, or a resolution error for its dependencies.
pub fn dependencies_changed(
    ctx: &RunContext<'_>,
    key: &PackageKey,
    record: &PackageRecord,
) -> Result<bool> {
    let spec = ctx.catalog.get(&key.name, &record.version)?;
    let current: BTreeSet<String> = ctx.dependency_list(key, spec)?.into_iter().collect();
    let recorded: BTreeSet<String> = record.dependencies.iter().cloned().collect();
    Ok(current != recorded)
}

/// Metadata [`analyze`] needs: the recorded version of every entry that is
/// not already outdated.
///
/// # Errors
///
/// See [`outdated`].
pub fn required_specs(
    ctx: &RunContext<'_>,
    state: &RepositoryState,
) -> Result<Vec<(PackageName, Version)>> {
    let mut wanted = Vec::new();
    for (key, record) in state.iter() {
        if !outdated(ctx, key, record)? {
            wanted.push((key.name.clone(), record.version.clone()));
        }
    }
    Ok(wanted)
}

/// Check every active entry. Outdated entries are rebuilt regardless, so
/// their dependencies are not compared.
///
/// # Errors
///
/// Propagates the first error from [`outdated`] or [`dependencies_changed`].
pub fn analyze(ctx: &RunContext<'_>, state: &RepositoryState) -> Result<StalenessReport> {
    let mut report = StalenessReport::default();

    for (key, record) in state.iter() {
        if outdated(ctx, key, record)? {
            debug!(%key, recorded = %record.version, "outdated");
            report.outdated.push(key.clone());
        } else if dependencies_changed(ctx, key, record)? {
            debug!(%key, "dependency list changed");
            report.changed.push(key.clone());
        }
    }

    Ok(report)
}
