//! Registry index snapshot stored as JSON.
//!
//! `<dir>/stable.json` and `<dir>/prerelease.json` each map a package name
//! to every published `{version, platform, required_runtime}` tuple, as
//! exported from the registry's native index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use ingot_schema::{Channel, PackageName, Requirement, Version};
use serde::Deserialize;

use crate::index::{ChannelListing, IndexedVersion};
use crate::io::IndexLoader;

#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    version: Version,
    #[serde(default = "default_platform")]
    platform: String,
    #[serde(default)]
    required_runtime: Option<Requirement>,
}

fn default_platform() -> String {
    "ruby".to_string()
}

/// Loads channel listings from a snapshot directory.
#[derive(Debug, Clone)]
pub struct JsonIndexLoader {
    dir: PathBuf,
    platforms: Vec<String>,
}

impl JsonIndexLoader {
    /// Read snapshots from `dir`, keeping only `platforms`.
    pub fn new(dir: impl Into<PathBuf>, platforms: &[String]) -> Self {
        Self {
            dir: dir.into(),
            platforms: platforms.to_vec(),
        }
    }

    fn path_for(&self, channel: Channel) -> PathBuf {
        self.dir.join(format!("{}.json", channel.as_str()))
    }

    fn parse(&self, content: &str, path: &Path) -> anyhow::Result<ChannelListing> {
        let raw: BTreeMap<PackageName, Vec<SnapshotEntry>> = serde_json::from_str(content)
            .with_context(|| format!("invalid index snapshot {}", path.display()))?;

        Ok(raw
            .into_iter()
            .map(|(name, entries)| {
                let versions = entries
                    .into_iter()
                    .filter(|e| self.platforms.iter().any(|p| *p == e.platform))
                    .map(|e| IndexedVersion {
                        version: e.version,
                        required_runtime: e.required_runtime,
                    })
                    .collect();
                (name, versions)
            })
            .collect())
    }
}

#[async_trait]
impl IndexLoader for JsonIndexLoader {
    async fn load_channel(&self, channel: Channel) -> anyhow::Result<ChannelListing> {
        let path = self.path_for(channel);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.parse(&content, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VersionIndex;

    #[tokio::test]
    async fn test_load_filters_platforms() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("stable.json"),
            r#"{
                "nokogiri": [
                    {"version": "1.15.0", "platform": "ruby", "required_runtime": ">= 2.7"},
                    {"version": "1.15.0", "platform": "x86_64-linux"},
                    {"version": "1.16.0"}
                ],
                "jruby-only": [{"version": "1.0", "platform": "java"}]
            }"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("prerelease.json"),
            r#"{"nokogiri": [{"version": "1.17.0.rc1"}]}"#,
        )
        .unwrap();

        let loader = JsonIndexLoader::new(tmp.path(), &["ruby".to_string()]);
        let index = VersionIndex::load(&loader, Some(Version::new("2.6"))).await.unwrap();
        let name = PackageName::new("nokogiri");

        assert_eq!(index.versions_for(&name, Channel::Stable), vec!["1.15.0", "1.16.0"]);
        assert_eq!(index.versions_for(&name, Channel::Prerelease), vec!["1.17.0.rc1"]);
        assert!(!index.matches_runtime(&name, &Version::new("1.15.0")));
        assert!(!index.knows(&PackageName::new("jruby-only")));
    }

    #[tokio::test]
    async fn test_missing_snapshot_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = JsonIndexLoader::new(tmp.path(), &["ruby".to_string()]);
        let err = loader.load_channel(Channel::Stable).await.unwrap_err();
        assert!(format!("{err:#}").contains("stable.json"));
    }
}
