//! Shared types for ingot.
//!
//! Everything in this crate is I/O-free: the version algebra, package
//! identities and the target naming scheme are used by the engine, the CLI
//! and the tests alike.

pub mod hash;
pub mod naming;
pub mod types;
pub mod version;

// Re-exports
pub use hash::*;
pub use naming::{NamingError, TargetNaming};
pub use types::*;
pub use version::{Constraint, Operator, Requirement, RequirementError, Version};
