//! Update command

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use ingot_core::executor::BuildExecutor;
use ingot_core::publish::PublishCoordinator;
use ingot_core::spec::SpecCatalog;
use ingot_core::Reporter;

use crate::session::{BuildTools, Session};
use crate::ui::{self, ConsoleReporter};

/// Plan, build and publish. With `dry_run` the plan is printed and nothing
/// is built.
pub async fn update(config: &Path, dry_run: bool) -> Result<()> {
    let started = Instant::now();
    let reporter = ConsoleReporter::new();

    reporter.section("Loading");
    let session = Session::open(config).await?;
    let mut repo = session.load_repository().await?;
    reporter.info(&format!(
        "{} packages in {}",
        repo.state.len(),
        session.settings.repo_name
    ));

    reporter.section("Planning");
    let engine = session.engine();
    let mut catalog = SpecCatalog::new();
    let plan = engine
        .plan(&mut catalog, &repo, &session.lists)
        .await
        .context("planning failed")?;
    reporter.warnings(&plan.warnings);
    ui::print_plan(&plan, &session.naming);

    if dry_run {
        reporter.info("dry run, nothing built");
        return Ok(());
    }
    if plan.order.is_empty() {
        reporter.info("repository is up to date");
        return Ok(());
    }

    reporter.section("Building");
    let tools = BuildTools::from_settings(&session.settings, &session.layout);
    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &session.layout,
        session.descriptor_settings(),
        tools.collaborators(&session.database),
        &reporter,
    );
    let built = executor
        .execute(&mut repo.state, &plan.order)
        .await
        .context("build failed")?;

    reporter.section("Publishing");
    let publisher = PublishCoordinator::new(&session.layout, tools.mirror());
    if let Some(marker) = publisher.finish(built.len()).await? {
        reporter.info(&format!("update marker {marker}"));
    }

    reporter.summary(built.len(), "built", started.elapsed().as_secs_f64());
    Ok(())
}
