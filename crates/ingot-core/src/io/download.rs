//! HTTP adapters for the upstream registry.
//!
//! Metadata comes from the registry's JSON API, artifacts are streamed to
//! disk with a running SHA256 and then opened to read the embedded
//! specification.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::StreamExt;
use ingot_schema::{PackageName, Requirement, Sha256Hash, Version};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::io::{ArchiveManifest, FetchedArtifact, Fetcher, SpecSource};
use crate::spec::{DependencyRequirement, PackageSpec};

/// Name of the gzipped specification inside an artifact.
const METADATA_ENTRY: &str = "metadata.gz";

#[derive(Debug, Deserialize)]
struct ApiDependency {
    name: PackageName,
    #[serde(default)]
    requirements: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDependencies {
    #[serde(default)]
    runtime: Vec<ApiDependency>,
}

#[derive(Debug, Deserialize)]
struct ApiVersion {
    name: PackageName,
    version: Version,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    homepage_uri: Option<String>,
    #[serde(default)]
    licenses: Option<Vec<String>>,
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    ruby_version: Option<String>,
    #[serde(default)]
    dependencies: ApiDependencies,
}

impl ApiVersion {
    fn into_spec(self) -> anyhow::Result<PackageSpec> {
        let runtime_dependencies = self
            .dependencies
            .runtime
            .into_iter()
            .map(|d| {
                let requirement: Requirement = d
                    .requirements
                    .parse()
                    .with_context(|| format!("dependency {}", d.name))?;
                Ok(DependencyRequirement::new(d.name, requirement))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let required_runtime = match self.ruby_version.as_deref().map(str::trim) {
            None | Some("" | ">= 0") => None,
            Some(req) => Some(req.parse().context("required runtime")?),
        };

        Ok(PackageSpec {
            name: self.name,
            version: self.version,
            summary: self.summary.or(self.info).unwrap_or_default().trim().to_string(),
            homepage: self.homepage_uri.unwrap_or_default(),
            licenses: self.licenses.unwrap_or_default(),
            runtime_dependencies,
            required_runtime,
            sha256: self.sha.map(Sha256Hash::new),
            ..PackageSpec::default()
        })
    }
}

/// Fetches package metadata from the registry JSON API.
#[derive(Debug, Clone)]
pub struct HttpSpecSource {
    client: Client,
    endpoint: String,
}

impl HttpSpecSource {
    /// Query the API rooted at `endpoint`.
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, name: &PackageName, version: &Version) -> String {
        format!(
            "{}/api/v2/rubygems/{name}/versions/{version}.json",
            self.endpoint
        )
    }
}

#[async_trait]
impl SpecSource for HttpSpecSource {
    async fn fetch_spec(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> anyhow::Result<PackageSpec> {
        let url = self.url(name, version);
        debug!(%url, "fetching metadata");
        let api: ApiVersion = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid metadata from {url}"))?;
        api.into_spec()
    }
}

/// Downloads artifacts from the registry's download endpoint.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    endpoint: String,
}

impl HttpFetcher {
    /// Download from `endpoint`, e.g. `https://rubygems.org/downloads`.
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        name: &PackageName,
        version: &Version,
        dest_dir: &Path,
    ) -> anyhow::Result<FetchedArtifact> {
        let file_name = format!("{name}-{version}.gem");
        let url = format!("{}/{file_name}", self.endpoint);
        let dest = dest_dir.join(&file_name);
        tokio::fs::create_dir_all(dest_dir).await?;

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        let mut file = File::create(&dest).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(%url, bytes = downloaded, "downloaded");

        let sha256 = Sha256Hash::new(hex::encode(hasher.finalize()));
        let path = dest.clone();
        let manifest = tokio::task::spawn_blocking(move || read_manifest(&path))
            .await
            .context("manifest reader panicked")??;

        Ok(FetchedArtifact {
            path: dest,
            sha256,
            manifest,
        })
    }
}

/// Open a downloaded artifact and read its embedded specification.
///
/// # Errors
///
/// Fails if the file is not a tar archive or has no readable `metadata.gz`.
pub fn read_manifest(path: &Path) -> anyhow::Result<ArchiveManifest> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut archive = tar::Archive::new(file);

    for entry in archive.entries()? {
        let entry = entry?;
        if entry.path()?.as_os_str() != METADATA_ENTRY {
            continue;
        }
        let mut yaml = String::new();
        GzDecoder::new(entry).read_to_string(&mut yaml)?;
        return parse_gemspec(&yaml);
    }

    anyhow::bail!("{} has no {METADATA_ENTRY}", path.display())
}

static TOP_LEVEL_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z_]+):\s*(.*)$").expect("valid regex"));
static NESTED_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+version:\s*(\S+)").expect("valid regex"));

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

/// Read the fields the packager needs out of a serialized gem specification.
///
/// Only the top-level `version`, `executables`, `extensions` and `files`
/// keys are looked at; everything else is skipped.
///
/// # Errors
///
/// Fails if no version is present.
pub fn parse_gemspec(yaml: &str) -> anyhow::Result<ArchiveManifest> {
    let mut version = None;
    let mut executables = Vec::new();
    let mut extensions = Vec::new();
    let mut files = Vec::new();
    let mut current: Option<&str> = None;

    for line in yaml.lines() {
        if let Some(caps) = TOP_LEVEL_KEY.captures(line) {
            let key = caps.get(1).map_or("", |m| m.as_str());
            current = Some(key).filter(|k| matches!(*k, "version" | "executables" | "extensions" | "files"));
            continue;
        }

        match current {
            Some("version") if version.is_none() => {
                if let Some(caps) = NESTED_VERSION.captures(line) {
                    version = Some(Version::new(unquote(&caps[1])));
                }
            }
            Some(list) => {
                let Some(item) = line.strip_prefix("- ") else {
                    continue;
                };
                let item = unquote(item).to_string();
                match list {
                    "executables" => executables.push(item),
                    "extensions" => extensions.push(item),
                    "files" => files.push(item),
                    _ => {}
                }
            }
            None => {}
        }
    }

    let version = version.context("specification has no version")?;
    Ok(ArchiveManifest {
        version,
        executables,
        has_extensions: !extensions.is_empty(),
        files,
    })
}
