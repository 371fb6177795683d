//! Plan command

use std::path::Path;

use anyhow::{Context, Result};
use ingot_core::spec::SpecCatalog;

use crate::session::Session;
use crate::ui::{self, ConsoleReporter};

/// Print what the next update would build, in build order.
pub async fn plan(config: &Path) -> Result<()> {
    let session = Session::open(config).await?;
    let repo = session.load_repository().await?;

    let mut catalog = SpecCatalog::new();
    let plan = session
        .engine()
        .plan(&mut catalog, &repo, &session.lists)
        .await
        .context("planning failed")?;

    ConsoleReporter::new().warnings(&plan.warnings);
    ui::print_plan(&plan, &session.naming);
    Ok(())
}
