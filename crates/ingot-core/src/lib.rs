//! Core library for ingot: mirrors a language package registry into a
//! binary package repository.
//!
//! The analyzers ([`staleness`], [`retention`]) and the [`planner`] are pure
//! and synchronous. Everything that touches the network, spawns processes
//! or changes the repository goes through the traits in [`io`].

pub mod builder;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod executor;
pub mod index;
pub mod io;
pub mod lists;
pub mod manifest;
pub mod paths;
pub mod planner;
pub mod publish;
pub mod render;
pub mod repo;
pub mod retention;
pub mod slot;
pub mod spec;
pub mod staleness;

pub mod reporter;

pub use config::Settings;
pub use context::RunContext;
pub use engine::{Engine, PackageLists, RunPlan};
pub use error::{EngineError, Result, Warning};
pub use paths::Layout;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for registry requests
pub const USER_AGENT: &str = concat!("ingot-core/", env!("CARGO_PKG_VERSION"));
