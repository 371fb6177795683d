//! Slot command

use std::path::Path;

use anyhow::{Context, Result};
use ingot_core::slot::SlotResolver;
use ingot_schema::{PackageKey, PackageName, Requirement};

use crate::session;

/// Print the version `constraint` resolves to and the target identity it
/// publishes under.
pub async fn slot(config: &Path, name: &str, constraint: &str) -> Result<()> {
    let settings = session::load_settings(config)?;
    let index = session::load_index(&settings).await?;

    let requirement: Requirement = constraint.parse()?;
    let name = PackageName::new(name);
    let resolution = SlotResolver::new(&index)
        .derive_slot(&name, &requirement, requirement.is_prerelease())
        .with_context(|| format!("no slot for {name}"))?;

    let identity = settings
        .naming()
        .identity(&PackageKey::new(name.clone(), resolution.slot));
    println!("{name} {} -> {identity}", resolution.version);
    Ok(())
}
