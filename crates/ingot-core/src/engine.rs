//! The planning half of a mirror run, and the glue around it.
//!
//! `load index -> load repository -> analyze staleness -> select candidates
//! -> resolve dependencies -> order`. Building and publishing are driven by
//! [`crate::executor::BuildExecutor`] and [`crate::publish::PublishCoordinator`].

use std::collections::BTreeSet;
use std::fmt;

use ingot_schema::{PackageKey, TargetNaming};
use tracing::{debug, info};

use crate::config::Settings;
use crate::context::RunContext;
use crate::error::{EngineError, Result, Warning};
use crate::index::VersionIndex;
use crate::io::{RepositoryDatabase, SpecSource};
use crate::lists;
use crate::manifest::PackageConfigs;
use crate::paths::Layout;
use crate::planner::{self, BuildPlanner, PlanInputs};
use crate::repo::{LoadedRepository, RepositoryState};
use crate::retention::RetentionPlan;
use crate::spec::SpecCatalog;
use crate::staleness::{self, StalenessReport};

/// Operator-maintained package lists.
#[derive(Debug, Clone, Default)]
pub struct PackageLists {
    /// Keys that must be present.
    pub whitelist: Vec<PackageKey>,
    /// Keys rebuilt on every run.
    pub forced: Vec<PackageKey>,
    /// Keys never built.
    pub ignored: BTreeSet<PackageKey>,
    /// Keys the base distribution provides.
    pub official: BTreeSet<PackageKey>,
}

impl PackageLists {
    /// Load every list named in `settings`. Only the whitelist is required.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for a missing whitelist or a
    /// malformed line in any list.
    pub fn load(settings: &Settings) -> Result<Self> {
        let naming = settings.naming();
        Ok(Self {
            whitelist: lists::load_package_list(&settings.whitelist)?,
            forced: lists::load_optional_package_list(&settings.rebuild_list)?,
            ignored: lists::load_optional_package_list(&settings.ignore_list)?
                .into_iter()
                .collect(),
            official: lists::load_official_list(&settings.official_list, &naming)?,
        })
    }
}

/// Result of planning one run.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    /// Outdated and changed entries.
    pub staleness: StalenessReport,
    /// Keys selected for building, before ordering.
    pub candidates: Vec<PackageKey>,
    /// Keys to build, dependencies first.
    pub order: Vec<PackageKey>,
    /// Non-fatal findings.
    pub warnings: Vec<Warning>,
}

/// Unpack the repository database and parse it.
///
/// # Errors
///
/// Fails if the database cannot be extracted or a descriptor is corrupt.
pub async fn load_repository(
    database: &dyn RepositoryDatabase,
    layout: &Layout,
    naming: &TargetNaming,
    index: &VersionIndex,
) -> Result<LoadedRepository> {
    let dir = layout.extracted_db_dir();
    database
        .extract(&dir)
        .await
        .map_err(|e| EngineError::external("repository database extract", &e))?;
    let repo = RepositoryState::load(&dir, naming, index)?;
    info!(
        active = repo.state.len(),
        yanked = repo.yanked.len(),
        "repository loaded"
    );
    Ok(repo)
}

/// Apply a retention plan: drop database entries, then delete files.
///
/// # Errors
///
/// Fails if the database tool fails or a file cannot be removed.
pub async fn apply_retention(
    plan: &RetentionPlan,
    database: &dyn RepositoryDatabase,
    naming: &TargetNaming,
) -> Result<()> {
    let identities: Vec<String> = plan.drop_entries.iter().map(|k| naming.identity(k)).collect();
    database
        .remove_entries(&identities)
        .await
        .map_err(|e| EngineError::external("repository database remove", &e))?;
    for file in &plan.delete_files {
        debug!(file = %file.display(), "deleting");
        std::fs::remove_file(file)?;
    }
    Ok(())
}

/// Shared inputs of the planning pipeline.
pub struct Engine<'a> {
    /// Upstream versions.
    pub index: &'a VersionIndex,
    /// Target naming scheme.
    pub naming: &'a TargetNaming,
    /// Per-package overrides.
    pub configs: &'a PackageConfigs,
    /// Identity every generated package depends on.
    pub base_dependency: &'a str,
    /// Upstream metadata.
    pub source: &'a dyn SpecSource,
    /// Upper bound on concurrent metadata requests.
    pub concurrency: usize,
}

impl fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("naming", &self.naming)
            .field("base_dependency", &self.base_dependency)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl<'a> Engine<'a> {
    /// A read-only context over `catalog`.
    pub fn context<'c>(&'c self, catalog: &'c SpecCatalog) -> RunContext<'c>
    where
        'a: 'c,
    {
        RunContext {
            index: self.index,
            catalog,
            naming: self.naming,
            configs: self.configs,
            base_dependency: self.base_dependency,
        }
    }

    /// Analyze `repo` and compute the build order.
    ///
    /// Metadata for recorded versions and for every candidate's dependency
    /// closure is fetched into `catalog` along the way.
    ///
    /// # Errors
    ///
    /// Fails on metadata fetch errors, unresolvable constraints and
    /// dependency cycles.
    pub async fn plan(
        &self,
        catalog: &mut SpecCatalog,
        repo: &LoadedRepository,
        lists: &PackageLists,
    ) -> Result<RunPlan> {
        let state = &repo.state;

        let wanted = staleness::required_specs(&self.context(catalog), state)?;
        catalog.prefetch(self.source, wanted, self.concurrency).await?;
        let report = staleness::analyze(&self.context(catalog), state)?;
        info!(
            outdated = report.outdated.len(),
            changed = report.changed.len(),
            "staleness analyzed"
        );

        let candidates = planner::candidates(
            state,
            &PlanInputs {
                whitelist: lists.whitelist.clone(),
                outdated: report.outdated.clone(),
                changed: report.changed.clone(),
                forced: lists.forced.clone(),
                ignored: lists.ignored.clone(),
            },
        );

        let planner = BuildPlanner::new(state, &lists.official);
        let map = planner
            .resolve_dependencies(self.index, catalog, self.source, &candidates, self.concurrency)
            .await?;
        let order = planner.order(&candidates, &map)?;
        info!(candidates = candidates.len(), builds = order.len(), "build order computed");

        Ok(RunPlan {
            staleness: report,
            candidates,
            order,
            warnings: repo.warnings.clone(),
        })
    }
}
