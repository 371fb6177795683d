//! Cleanup command

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use ingot_core::engine;
use ingot_core::retention::RetentionAnalyzer;
use ingot_core::Reporter;

use crate::session::Session;
use crate::ui::{self, ConsoleReporter};

/// List entries nothing depends on and files nothing references; remove
/// them when `apply` is set.
pub async fn cleanup(config: &Path, apply: bool) -> Result<()> {
    let started = Instant::now();
    let reporter = ConsoleReporter::new();

    let session = Session::open(config).await?;
    let repo = session.load_repository().await?;

    let analyzer = RetentionAnalyzer {
        naming: &session.naming,
        artifact_extension: &session.settings.artifact_extension,
    };
    let plan = analyzer
        .analyze(
            &repo,
            &session.lists.whitelist,
            &session.lists.official,
            session.layout.storage_dir(),
        )
        .context("retention analysis failed")?;

    reporter.warnings(repo.warnings.iter().chain(&plan.warnings));
    ui::print_retention(&plan, &session.naming);

    if plan.is_empty() {
        reporter.info("nothing to remove");
        return Ok(());
    }
    if !apply {
        reporter.info("run with --apply to remove them");
        return Ok(());
    }

    engine::apply_retention(&plan, &session.database, &session.naming)
        .await
        .context("cleanup failed")?;
    reporter.summary(
        plan.drop_entries.len() + plan.delete_files.len(),
        "removed",
        started.elapsed().as_secs_f64(),
    );
    Ok(())
}
