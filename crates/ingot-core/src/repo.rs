//! In-memory view of the target repository.
//!
//! The repository database is a tarball of one directory per package, each
//! holding a `desc` file (and, in older layouts, a separate `depends` file)
//! made of `%FIELD%` headers followed by one value per line:
//!
//! ```text
//! %FILENAME%
//! ruby-rack-2.2.8-1-any.pkg.tar.xz
//!
//! %NAME%
//! ruby-rack
//!
//! %VERSION%
//! 2.2.8-1
//!
//! %DEPENDS%
//! ruby
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use ingot_schema::{PackageKey, TargetNaming, Version};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{EngineError, Result, Warning};
use crate::index::VersionIndex;

static VERSION_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-(\d+)$").expect("static pattern"));

/// What the repository records about one published package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    /// Upstream version packaged.
    pub version: Version,
    /// Build revision of that version, starting at 1.
    pub build_revision: u32,
    /// Target identities this package depends on, sorted.
    pub dependencies: Vec<String>,
    /// Artifact file name in repository storage.
    pub filename: String,
}

/// Result of loading the repository database.
#[derive(Debug, Default)]
pub struct LoadedRepository {
    /// Active entries.
    pub state: RepositoryState,
    /// Entries whose version was yanked upstream; kept out of `state` until
    /// a retention pass removes them.
    pub yanked: BTreeMap<PackageKey, PackageRecord>,
    /// One warning per yanked entry.
    pub warnings: Vec<Warning>,
}

/// Active repository entries keyed by [`PackageKey`].
#[derive(Debug, Clone, Default)]
pub struct RepositoryState {
    records: BTreeMap<PackageKey, PackageRecord>,
}

impl RepositoryState {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every descriptor under `dir` (the unpacked database).
    ///
    /// A missing directory is an empty repository. Entries whose version is
    /// no longer listed upstream while a newer one is are moved to
    /// [`LoadedRepository::yanked`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CorruptRepository`] for a duplicate identity, a
    /// version without a `-<revision>` suffix, or a descriptor missing a
    /// required field.
    pub fn load(dir: &Path, naming: &TargetNaming, index: &VersionIndex) -> Result<LoadedRepository> {
        let mut loaded = LoadedRepository::default();
        if !dir.is_dir() {
            return Ok(loaded);
        }

        let mut all = BTreeMap::new();
        for entry in walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_dir()
                || !entry.file_name().to_string_lossy().starts_with(naming.prefix())
            {
                continue;
            }
            let (key, record) = parse_entry(entry.path(), naming)?;
            if all.contains_key(&key) {
                return Err(EngineError::CorruptRepository(format!(
                    "duplicate entry for {}",
                    naming.identity(&key)
                )));
            }
            all.insert(key, record);
        }

        for (key, record) in all {
            let listed = index.contains(&key.name, &record.version);
            if !listed && index.has_newer(&key.name, &record.version) {
                let warning = Warning::YankedVersion {
                    key: key.clone(),
                    version: record.version.clone(),
                };
                warn!("{warning}");
                loaded.warnings.push(warning);
                loaded.yanked.insert(key, record);
            } else {
                loaded.state.records.insert(key, record);
            }
        }

        debug!(
            active = loaded.state.len(),
            yanked = loaded.yanked.len(),
            "repository state loaded"
        );
        Ok(loaded)
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, key: PackageKey, record: PackageRecord) {
        self.records.insert(key, record);
    }

    /// The record for `key`.
    pub fn get(&self, key: &PackageKey) -> Option<&PackageRecord> {
        self.records.get(key)
    }

    /// Whether `key` is active.
    pub fn contains(&self, key: &PackageKey) -> bool {
        self.records.contains_key(key)
    }

    /// Active keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &PackageKey> {
        self.records.keys()
    }

    /// Active entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PackageKey, &PackageRecord)> {
        self.records.iter()
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing is published.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The revision the next build of `key` at `version` gets: one more than
    /// the recorded revision for the same version, 1 otherwise.
    pub fn next_revision(&self, key: &PackageKey, version: &Version) -> u32 {
        match self.records.get(key) {
            Some(r) if &r.version == version => r.build_revision + 1,
            _ => 1,
        }
    }

    /// Record a successful build, returning the stored revision.
    pub fn record_build(
        &mut self,
        key: &PackageKey,
        version: &Version,
        dependencies: Vec<String>,
        filename: String,
    ) -> u32 {
        let build_revision = self.next_revision(key, version);
        self.records.insert(
            key.clone(),
            PackageRecord {
                version: version.clone(),
                build_revision,
                dependencies,
                filename,
            },
        );
        build_revision
    }
}

/// Parse `%FIELD%` sections into `field -> values`.
fn parse_sections(content: &str) -> HashMap<String, Vec<String>> {
    let mut sections: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            current = None;
        } else if line.len() > 2 && line.starts_with('%') && line.ends_with('%') {
            let field = line.trim_matches('%').to_string();
            sections.entry(field.clone()).or_default();
            current = Some(field);
        } else if let Some(field) = &current {
            sections.entry(field.clone()).or_default().push(line.to_string());
        }
    }

    sections
}

/// Split `2.2.8-3` into `(2.2.8, 3)`.
pub fn split_version_revision(value: &str) -> Option<(Version, u32)> {
    let caps = VERSION_REVISION.captures(value)?;
    let revision = caps.get(2)?.as_str().parse().ok()?;
    Some((Version::new(caps.get(1)?.as_str()), revision))
}

fn parse_entry(entry_dir: &Path, naming: &TargetNaming) -> Result<(PackageKey, PackageRecord)> {
    let desc_path = entry_dir.join("desc");
    let content = std::fs::read_to_string(&desc_path).map_err(|e| {
        EngineError::CorruptRepository(format!("cannot read {}: {e}", desc_path.display()))
    })?;
    let mut sections = parse_sections(&content);

    let depends_path = entry_dir.join("depends");
    if depends_path.is_file() {
        let extra = parse_sections(&std::fs::read_to_string(&depends_path)?);
        for (field, values) in extra {
            sections.entry(field).or_default().extend(values);
        }
    }

    let single = |field: &str| -> Result<String> {
        sections
            .get(field)
            .and_then(|v| v.first())
            .cloned()
            .ok_or_else(|| {
                EngineError::CorruptRepository(format!(
                    "{} has no %{field}%",
                    desc_path.display()
                ))
            })
    };

    let identity = single("NAME")?;
    let raw_version = single("VERSION")?;
    let filename = single("FILENAME")?;

    let key = naming.parse(&identity)?;
    let (version, build_revision) = split_version_revision(&raw_version).ok_or_else(|| {
        EngineError::CorruptRepository(format!(
            "{identity}: version '{raw_version}' has no -<revision> suffix"
        ))
    })?;

    let mut dependencies = sections.remove("DEPENDS").unwrap_or_default();
    dependencies.sort();
    dependencies.dedup();

    Ok((
        key,
        PackageRecord {
            version,
            build_revision,
            dependencies,
            filename,
        },
    ))
}
