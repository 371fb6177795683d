//! Error taxonomy for a mirror run.
//!
//! Every [`EngineError`] is fatal: it unwinds the whole run. Builds that
//! were already published before the error stay published. Non-fatal
//! findings are collected as [`Warning`]s and reported to the operator.

use std::fmt;

use ingot_schema::{NamingError, PackageKey, PackageName, Version};
use thiserror::Error;

/// Fatal errors raised by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No version or slot satisfies a constraint.
    #[error("cannot resolve {name} ({constraint}): {reason}")]
    Resolution {
        /// Package being resolved.
        name: PackageName,
        /// The constraint or slot that could not be satisfied.
        constraint: String,
        /// What went wrong.
        reason: String,
    },

    /// Duplicate identity, malformed version-revision suffix or malformed descriptor.
    #[error("corrupt repository: {0}")]
    CorruptRepository(String),

    /// The external build did not produce the expected artifact.
    #[error("binary package was not built: {0}")]
    BuildFailure(String),

    /// The fetched artifact embeds a different version than the one resolved.
    #[error("version mismatch for {name}: index has {expected}, artifact embeds {actual}")]
    VersionMismatch {
        /// Package whose artifact was fetched.
        name: PackageName,
        /// Version resolved from the index.
        expected: Version,
        /// Version found inside the artifact.
        actual: Version,
    },

    /// The fetched artifact's content hash differs from the registry's.
    #[error("checksum mismatch for {name} {version}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Package whose artifact was fetched.
        name: PackageName,
        /// Version fetched.
        version: Version,
        /// Hash published by the registry.
        expected: String,
        /// Hash of the downloaded file.
        actual: String,
    },

    /// The packages scheduled for building depend on each other in a cycle.
    #[error("dependency cycle among packages to build: {}", render_cycle(.0))]
    Cycle(Vec<PackageKey>),

    /// Upstream metadata for a package version was needed but never loaded.
    #[error("no upstream metadata loaded for {name} {version}")]
    MissingSpec {
        /// Package name.
        name: PackageName,
        /// Package version.
        version: Version,
    },

    /// Invalid configuration or package list.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external collaborator (fetcher, builder, signer, ...) failed.
    #[error("{stage} failed: {message}")]
    External {
        /// Which collaborator failed.
        stage: &'static str,
        /// Rendered error chain.
        message: String,
    },

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap an error returned by an external collaborator.
    pub fn external(stage: &'static str, err: &anyhow::Error) -> Self {
        Self::External {
            stage,
            message: format!("{err:#}"),
        }
    }

    /// Shorthand for a [`EngineError::Resolution`].
    pub fn resolution(
        name: &PackageName,
        constraint: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            name: name.clone(),
            constraint: constraint.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<NamingError> for EngineError {
    fn from(err: NamingError) -> Self {
        Self::CorruptRepository(err.to_string())
    }
}

fn render_cycle(keys: &[PackageKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result alias used throughout the engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Non-fatal findings surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A recorded version vanished upstream while a newer one exists.
    YankedVersion {
        /// Affected repository entry.
        key: PackageKey,
        /// The version recorded in the repository.
        version: Version,
    },

    /// A retention root or recorded dependency is not in the repository.
    MissingDependency {
        /// The identity that could not be found.
        key: PackageKey,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::YankedVersion { key, version } => write!(
                f,
                "{key} {version} was yanked upstream; excluded from the active repository"
            ),
            Self::MissingDependency { key } => write!(f, "missing dependency {key}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = EngineError::Cycle(vec![
            PackageKey::head("a"),
            PackageKey::slotted("b", "1"),
            PackageKey::head("a"),
        ]);
        assert_eq!(
            err.to_string(),
            "dependency cycle among packages to build: a -> b[1] -> a"
        );
    }

    #[test]
    fn test_external_keeps_chain() {
        let err = anyhow::anyhow!("exit 2").context("makepkg");
        let wrapped = EngineError::external("build", &err);
        assert_eq!(wrapped.to_string(), "build failed: makepkg: exit 2");
    }
}
