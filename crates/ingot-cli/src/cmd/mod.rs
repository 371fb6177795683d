//! Command implementations

pub mod cleanup;
pub mod plan;
pub mod slot;
pub mod update;
