//! Operator-maintained package lists.
//!
//! Whitelist, rebuild and ignore lists hold one `name` or `name,slot` entry
//! per line. The officially provided list holds target identities as the
//! base distribution publishes them.

use std::collections::BTreeSet;
use std::path::Path;

use ingot_schema::{PackageKey, Slot, TargetNaming};
use tracing::debug;

use crate::error::{EngineError, Result};

fn entries(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Parse `name` / `name,slot` lines, keeping file order and dropping duplicates.
///
/// # Errors
///
/// Returns [`EngineError::Config`] for a line with more than one comma or
/// an empty name.
pub fn parse_package_list(content: &str, source: &str) -> Result<Vec<PackageKey>> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();

    for (line_no, line) in entries(content) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let key = match fields.as_slice() {
            [name] if !name.is_empty() => PackageKey::head(*name),
            [name, slot] if !name.is_empty() && !slot.is_empty() => {
                PackageKey::slotted(*name, Slot::new(slot))
            }
            _ => {
                return Err(EngineError::Config(format!(
                    "{source}:{line_no}: expected 'name' or 'name,slot', got '{line}'"
                )));
            }
        };
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }

    Ok(keys)
}

/// Read a package list from disk.
///
/// # Errors
///
/// Returns [`EngineError::Config`] if the file is missing or malformed.
pub fn load_package_list(path: &Path) -> Result<Vec<PackageKey>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let keys = parse_package_list(&content, &path.display().to_string())?;
    debug!(path = %path.display(), count = keys.len(), "loaded package list");
    Ok(keys)
}

/// Like [`load_package_list`], but a missing file is an empty list.
///
/// # Errors
///
/// Returns [`EngineError::Config`] if the file exists but is malformed.
pub fn load_optional_package_list(path: &Path) -> Result<Vec<PackageKey>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    load_package_list(path)
}

/// Parse officially provided target identities.
///
/// Lines may carry extra whitespace-separated columns (`pacman -Sl` output is
/// `repo name version`); the first column that belongs to the naming scheme
/// is used. Identities outside the scheme are not ours and are ignored.
pub fn parse_official_list(content: &str, naming: &TargetNaming) -> BTreeSet<PackageKey> {
    entries(content)
        .filter_map(|(_, line)| {
            line.split_whitespace()
                .find(|field| naming.belongs(field))
                .and_then(|identity| naming.parse(identity).ok())
        })
        .collect()
}

/// Read the officially provided set; a missing file means nothing is provided.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the file exists but cannot be read.
pub fn load_official_list(path: &Path, naming: &TargetNaming) -> Result<BTreeSet<PackageKey>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(parse_official_list(&content, naming))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_list() {
        let content = "# web stack\nrack\n\nrails, 4.2\nrack\n  thor  \n";
        let keys = parse_package_list(content, "whitelist").unwrap();
        assert_eq!(
            keys,
            vec![
                PackageKey::head("rack"),
                PackageKey::slotted("rails", "4.2"),
                PackageKey::head("thor"),
            ]
        );
    }

    #[test]
    fn test_too_many_commas() {
        let err = parse_package_list("rack,1,2\n", "whitelist").unwrap_err();
        assert!(err.to_string().contains("whitelist:1"));
    }

    #[test]
    fn test_empty_slot_rejected() {
        assert!(parse_package_list("rack,\n", "whitelist").is_err());
    }

    #[test]
    fn test_parse_official_list() {
        let naming = TargetNaming::default();
        let content = "extra ruby-rake 13.0.6-1\ncommunity ruby-rack-2 2.2.8-1\ncore glibc 2.39-1\nruby-thor\n";
        let official = parse_official_list(content, &naming);
        assert_eq!(official.len(), 3);
        assert!(official.contains(&PackageKey::head("rake")));
        assert!(official.contains(&PackageKey::slotted("rack", "2")));
        assert!(official.contains(&PackageKey::head("thor")));
    }

    #[test]
    fn test_missing_optional_list_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let keys = load_optional_package_list(&dir.path().join("rebuild_packages")).unwrap();
        assert!(keys.is_empty());
        assert!(load_package_list(&dir.path().join("whitelist_packages")).is_err());
    }
}
