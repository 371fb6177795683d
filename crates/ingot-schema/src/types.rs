use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

use crate::version::Version;

/// An upstream package name.
///
/// Upstream names are case-sensitive, so unlike most identifiers in the
/// target repository the name is stored exactly as published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name.
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A coexistence identifier pinning a version range of one package.
///
/// Either an exact prerelease version, or a numeric prefix shared by one or
/// more stable versions (`"1"` selects `1`, `1.x`, `1.x.y`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(String);

impl Slot {
    /// Create a slot from its textual form.
    pub fn new(s: &str) -> Self {
        Self(s.to_string())
    }

    /// Return the slot as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prerelease slots name one exact prerelease version.
    pub fn is_prerelease(&self) -> bool {
        self.0.chars().any(|c| c.is_ascii_alphabetic())
    }

    /// Whether `version` falls inside this slot: equal to it, or extending
    /// it with further dot-separated components.
    pub fn contains(&self, version: &Version) -> bool {
        let v = version.as_str();
        v == self.0
            || v.strip_prefix(self.0.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }

    /// Slots from most to least specific: `3.4.1` yields `3.4.1`, `3.4`, `3`.
    pub fn ladder(&self) -> Vec<String> {
        let mut result = Vec::new();
        let mut current = self.0.as_str();
        while let Some(idx) = current.rfind('.') {
            result.push(current.to_string());
            current = &current[..idx];
        }
        result.push(current.to_string());
        result
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Slot {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Slot {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The identity of one publishable unit: an upstream name plus an optional slot.
///
/// A key without a slot is the *head* package, which always tracks the
/// newest stable upstream version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageKey {
    /// Upstream package name.
    pub name: PackageName,
    /// Coexistence slot; `None` is the head package.
    pub slot: Option<Slot>,
}

impl PackageKey {
    /// Create a key from its parts.
    pub fn new(name: impl Into<PackageName>, slot: Option<Slot>) -> Self {
        Self {
            name: name.into(),
            slot,
        }
    }

    /// The head key for `name`.
    pub fn head(name: impl Into<PackageName>) -> Self {
        Self::new(name, None)
    }

    /// A slotted key for `name`.
    pub fn slotted(name: impl Into<PackageName>, slot: impl Into<Slot>) -> Self {
        Self::new(name, Some(slot.into()))
    }

    /// True for the null-slot identity.
    pub fn is_head(&self) -> bool {
        self.slot.is_none()
    }

    /// The head key sharing this key's name.
    pub fn to_head(&self) -> Self {
        Self::head(self.name.clone())
    }
}

impl std::fmt::Display for PackageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.slot {
            Some(slot) => write!(f, "{}[{slot}]", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Stable or prerelease partition of a package's version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Versions without alphabetic components.
    Stable,
    /// Versions with at least one alphabetic component.
    Prerelease,
}

impl Channel {
    /// The channel a version belongs to.
    pub fn of(version: &Version) -> Self {
        if version.is_prerelease() {
            Self::Prerelease
        } else {
            Self::Stable
        }
    }

    /// Convert to string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Prerelease => "prerelease",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
