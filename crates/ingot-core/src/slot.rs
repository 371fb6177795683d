//! Version and slot resolution against a [`VersionIndex`].
//!
//! A slot is the shortest dotted prefix of a resolved version that still
//! excludes the next upstream release, so `~> 1.0` over `[1.0, 1.1, 2.0]`
//! resolves to `1.1` in slot `1`. The newest stable version lives in the
//! head slot (`None`).

use ingot_schema::{Channel, PackageKey, PackageName, Requirement, Slot, Version};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::index::VersionIndex;
use crate::spec::{DependencyRequirement, PackageSpec};

/// A resolved `(version, slot)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotResolution {
    /// The version that satisfies the constraint.
    pub version: Version,
    /// The slot that version publishes under; `None` for the head package.
    pub slot: Option<Slot>,
}

/// Pure resolver over one immutable [`VersionIndex`].
#[derive(Debug, Clone, Copy)]
pub struct SlotResolver<'a> {
    index: &'a VersionIndex,
}

impl<'a> SlotResolver<'a> {
    /// Create a resolver reading `index`.
    pub fn new(index: &'a VersionIndex) -> Self {
        Self { index }
    }

    /// The newest version satisfying `requirement` that is usable on the
    /// current runtime.
    ///
    /// The stable channel is searched first; the prerelease channel only
    /// when `allow_prerelease` is set and the stable channel has no match.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Resolution`] if neither channel yields a match.
    pub fn resolve_version(
        &self,
        name: &PackageName,
        requirement: &Requirement,
        allow_prerelease: bool,
    ) -> Result<Version> {
        let mut channels = vec![Channel::Stable];
        if allow_prerelease {
            channels.push(Channel::Prerelease);
        }

        channels
            .into_iter()
            .find_map(|channel| self.newest_match(name, requirement, channel))
            .cloned()
            .ok_or_else(|| {
                EngineError::resolution(name, requirement, "no published version satisfies it")
            })
    }

    fn newest_match(
        &self,
        name: &PackageName,
        requirement: &Requirement,
        channel: Channel,
    ) -> Option<&'a Version> {
        self.index
            .entries(name, channel)
            .iter()
            .rev()
            .map(|e| &e.version)
            .find(|v| requirement.matches(v) && self.index.matches_runtime(name, v))
    }

    /// Resolve `requirement` and derive the slot the result publishes under.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Resolution`] if no version matches, or if the
    /// resolved version is a strict prefix of the next one (`1.0` followed by
    /// `1.0.0`), which leaves no distinguishing slot.
    pub fn derive_slot(
        &self,
        name: &PackageName,
        requirement: &Requirement,
        allow_prerelease: bool,
    ) -> Result<SlotResolution> {
        let version = self.resolve_version(name, requirement, allow_prerelease)?;

        if version.is_prerelease() {
            let slot = Some(Slot::new(version.as_str()));
            return Ok(SlotResolution { version, slot });
        }

        let stable = self.index.versions_for(name, Channel::Stable);
        let next = stable
            .iter()
            .position(|v| **v == version)
            .and_then(|i| stable.get(i + 1));

        let Some(next) = next else {
            return Ok(SlotResolution {
                version,
                slot: None,
            });
        };

        let slot = distinguishing_prefix(&version, next)
            .ok_or_else(|| {
                EngineError::resolution(
                    name,
                    requirement,
                    format!("{version} has no slot distinct from the next release {next}"),
                )
            })?;
        debug!(%name, %version, %slot, "derived slot");

        Ok(SlotResolution {
            version,
            slot: Some(slot),
        })
    }

    /// The package key a declared dependency resolves to.
    ///
    /// # Errors
    ///
    /// Propagates [`EngineError::Resolution`] from [`Self::derive_slot`].
    pub fn dependency_key(&self, dep: &DependencyRequirement) -> Result<PackageKey> {
        let resolved = self.derive_slot(&dep.name, &dep.requirement, dep.prerelease)?;
        Ok(PackageKey::new(dep.name.clone(), resolved.slot))
    }

    /// Package keys for every runtime dependency of `spec`, in declaration order.
    ///
    /// # Errors
    ///
    /// Fails on the first dependency that cannot be resolved.
    pub fn dependency_keys(&self, spec: &PackageSpec) -> Result<Vec<PackageKey>> {
        spec.runtime_dependencies
            .iter()
            .map(|d| self.dependency_key(d))
            .collect()
    }

    /// Every listed version inside `slot`, ascending.
    ///
    /// The head slot selects the whole stable channel. A prerelease slot
    /// searches the prerelease channel.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Resolution`] if nothing falls inside the slot.
    pub fn versions_in_slot(
        &self,
        name: &PackageName,
        slot: Option<&Slot>,
    ) -> Result<Vec<&'a Version>> {
        let channel = match slot {
            Some(s) if s.is_prerelease() => Channel::Prerelease,
            _ => Channel::Stable,
        };

        let versions: Vec<&Version> = self
            .index
            .versions_for(name, channel)
            .into_iter()
            .filter(|v| slot.is_none_or(|s| s.contains(v)))
            .collect();

        if versions.is_empty() {
            let shown = slot.map_or_else(|| "head".to_string(), ToString::to_string);
            return Err(EngineError::resolution(
                name,
                format!("slot {shown}"),
                "no published version falls inside the slot",
            ));
        }
        Ok(versions)
    }

    /// The newest version inside `key`'s slot that is usable on the current
    /// runtime.
    ///
    /// # Errors
    ///
    /// See [`Self::versions_in_slot`]. Also fails if every version in the slot
    /// requires a different runtime.
    pub fn latest_in_slot(&self, key: &PackageKey) -> Result<Version> {
        let versions = self.versions_in_slot(&key.name, key.slot.as_ref())?;
        versions
            .iter()
            .rev()
            .find(|v| self.index.matches_runtime(&key.name, v))
            .map(|v| (*v).clone())
            .ok_or_else(|| {
                EngineError::resolution(&key.name, key, "no version in the slot supports this runtime")
            })
    }
}

/// Walk both versions component by component, keeping resolved components
/// up to and including the first one that differs.
fn distinguishing_prefix(resolved: &Version, next: &Version) -> Option<Slot> {
    let next_parts: Vec<&str> = next.components().collect();
    let mut slot = String::new();

    for (i, part) in resolved.components().enumerate() {
        if i > 0 {
            slot.push('.');
        }
        slot.push_str(part);
        if next_parts.get(i) != Some(&part) {
            return Some(Slot::new(&slot));
        }
    }

    None
}
