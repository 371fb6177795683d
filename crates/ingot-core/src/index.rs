//! Per-run snapshot of every upstream version, split by channel.
//!
//! The index is loaded once, completely, before any resolution happens and is
//! never mutated afterwards. Both channels are fetched concurrently.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use ingot_schema::{Channel, PackageName, Requirement, Version};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::io::IndexLoader;

/// One version as listed by the registry index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedVersion {
    /// The upstream version.
    pub version: Version,
    /// Declared minimum runtime, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_runtime: Option<Requirement>,
}

impl IndexedVersion {
    /// A version without a runtime requirement.
    pub fn new(version: &str) -> Self {
        Self {
            version: Version::new(version),
            required_runtime: None,
        }
    }

    /// Attach a runtime requirement.
    pub fn with_runtime(mut self, requirement: Requirement) -> Self {
        self.required_runtime = Some(requirement);
        self
    }
}

/// `name -> versions` for one channel, as produced by an [`IndexLoader`].
pub type ChannelListing = BTreeMap<PackageName, Vec<IndexedVersion>>;

/// Immutable snapshot of all known upstream versions.
#[derive(Debug, Clone, Default)]
pub struct VersionIndex {
    stable: HashMap<PackageName, Vec<IndexedVersion>>,
    prerelease: HashMap<PackageName, Vec<IndexedVersion>>,
    runtime: Option<Version>,
}

impl VersionIndex {
    /// Build an index from two channel listings.
    ///
    /// Lists are sorted ascending and de-duplicated; versions filed under the
    /// wrong channel are dropped.
    pub fn new(stable: ChannelListing, prerelease: ChannelListing, runtime: Option<Version>) -> Self {
        Self {
            stable: normalize(stable, Channel::Stable),
            prerelease: normalize(prerelease, Channel::Prerelease),
            runtime,
        }
    }

    /// Load both channels through `loader`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::External`] if either channel fails to load; no
    /// partially loaded index is ever returned.
    pub async fn load(loader: &dyn IndexLoader, runtime: Option<Version>) -> Result<Self> {
        let (stable, prerelease) = tokio::try_join!(
            loader.load_channel(Channel::Stable),
            loader.load_channel(Channel::Prerelease)
        )
        .map_err(|e| EngineError::external("index load", &e))?;

        let index = Self::new(stable, prerelease, runtime);
        info!(
            stable = index.stable.len(),
            prerelease = index.prerelease.len(),
            "version index loaded"
        );
        Ok(index)
    }

    fn channel(&self, channel: Channel) -> &HashMap<PackageName, Vec<IndexedVersion>> {
        match channel {
            Channel::Stable => &self.stable,
            Channel::Prerelease => &self.prerelease,
        }
    }

    /// All entries for `name` in `channel`, ascending.
    pub fn entries(&self, name: &PackageName, channel: Channel) -> &[IndexedVersion] {
        self.channel(channel).get(name).map_or(&[], Vec::as_slice)
    }

    /// All versions for `name` in `channel`, ascending.
    pub fn versions_for(&self, name: &PackageName, channel: Channel) -> Vec<&Version> {
        self.entries(name, channel).iter().map(|e| &e.version).collect()
    }

    /// Whether the registry lists `name` in any channel.
    pub fn knows(&self, name: &PackageName) -> bool {
        self.stable.contains_key(name) || self.prerelease.contains_key(name)
    }

    fn find(&self, name: &PackageName, version: &Version) -> Option<&IndexedVersion> {
        self.entries(name, Channel::of(version))
            .iter()
            .find(|e| &e.version == version)
    }

    /// Whether `version` of `name` is currently listed.
    pub fn contains(&self, name: &PackageName, version: &Version) -> bool {
        self.find(name, version).is_some()
    }

    /// Whether a version strictly newer than `version` exists in its channel.
    pub fn has_newer(&self, name: &PackageName, version: &Version) -> bool {
        self.entries(name, Channel::of(version))
            .iter()
            .any(|e| e.version.precedence(version) == Ordering::Greater)
    }

    /// Whether `version`'s declared minimum runtime is met by the current runtime.
    ///
    /// Versions without a requirement, and runs without a known runtime,
    /// always match.
    pub fn matches_runtime(&self, name: &PackageName, version: &Version) -> bool {
        let Some(runtime) = &self.runtime else {
            return true;
        };
        self.find(name, version)
            .and_then(|e| e.required_runtime.as_ref())
            .is_none_or(|req| req.matches(runtime))
    }

    /// The runtime version this run targets.
    pub fn runtime(&self) -> Option<&Version> {
        self.runtime.as_ref()
    }
}

fn normalize(
    listing: ChannelListing,
    channel: Channel,
) -> HashMap<PackageName, Vec<IndexedVersion>> {
    listing
        .into_iter()
        .filter_map(|(name, mut versions)| {
            versions.retain(|e| Channel::of(&e.version) == channel);
            versions.sort_by(|a, b| a.version.cmp(&b.version));
            versions.dedup_by(|a, b| a.version == b.version);
            (!versions.is_empty()).then_some((name, versions))
        })
        .collect()
}
