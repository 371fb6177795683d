//! Mapping between package keys and target-repository identities.
//!
//! A target identity is `<prefix><name>` for a head package and
//! `<prefix><name>-<slot>` for a slotted one. Slots always start with a
//! digit, which is what disambiguates them from hyphenated upstream names.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::types::{PackageKey, Slot};

/// Name plus optional slot of an identity with the prefix stripped.
static NAME_SLOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)(?:-(\d[0-9A-Za-z.]*))?$").expect("static pattern"));

/// Errors raised when a target identity does not follow the naming scheme.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// The identity does not start with the configured prefix.
    #[error("'{identity}' does not belong to the '{prefix}' naming scheme")]
    ForeignIdentity {
        /// The rejected identity.
        identity: String,
        /// The expected prefix.
        prefix: String,
    },

    /// The identity has the prefix but no parsable package name.
    #[error("'{0}' has no package name after the prefix")]
    Malformed(String),
}

/// The target naming scheme for one repository.
#[derive(Debug, Clone)]
pub struct TargetNaming {
    prefix: String,
}

impl TargetNaming {
    /// Create a naming scheme for the given identity prefix (e.g. `ruby-`).
    /// Any string is accepted; the prefix is compared literally.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// The identity prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The target identity of `key`.
    pub fn identity(&self, key: &PackageKey) -> String {
        match &key.slot {
            Some(slot) => format!("{}{}-{slot}", self.prefix, key.name),
            None => format!("{}{}", self.prefix, key.name),
        }
    }

    /// Whether `identity` is one of ours.
    pub fn belongs(&self, identity: &str) -> bool {
        identity.starts_with(&self.prefix)
    }

    /// Recover the package key from a target identity.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError`] if the identity lacks the prefix or a name.
    pub fn parse(&self, identity: &str) -> Result<PackageKey, NamingError> {
        let rest = identity.strip_prefix(self.prefix.as_str()).ok_or_else(|| {
            NamingError::ForeignIdentity {
                identity: identity.to_string(),
                prefix: self.prefix.clone(),
            }
        })?;

        let caps = NAME_SLOT
            .captures(rest)
            .ok_or_else(|| NamingError::Malformed(identity.to_string()))?;
        let name = caps
            .get(1)
            .map(|m| m.as_str())
            .ok_or_else(|| NamingError::Malformed(identity.to_string()))?;
        let slot = caps.get(2).map(|m| Slot::new(m.as_str()));

        Ok(PackageKey::new(name, slot))
    }
}

impl Default for TargetNaming {
    fn default() -> Self {
        Self::new("ruby-")
    }
}
