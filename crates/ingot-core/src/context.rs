use std::collections::BTreeSet;

use ingot_schema::{PackageKey, TargetNaming};

use crate::error::Result;
use crate::index::VersionIndex;
use crate::manifest::PackageConfigs;
use crate::slot::SlotResolver;
use crate::spec::{PackageSpec, SpecCatalog};

/// Read-only inputs shared by the analyzers and the planner for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Upstream versions.
    pub index: &'a VersionIndex,
    /// Prefetched upstream metadata.
    pub catalog: &'a SpecCatalog,
    /// Target naming scheme.
    pub naming: &'a TargetNaming,
    /// Per-package overrides.
    pub configs: &'a PackageConfigs,
    /// Identity every generated package depends on.
    pub base_dependency: &'a str,
}

impl<'a> RunContext<'a> {
    /// A resolver over this run's index.
    pub fn resolver(&self) -> SlotResolver<'a> {
        SlotResolver::new(self.index)
    }

    /// The full target dependency list of `key` built from `spec`: the base
    /// dependency, configured extras, and every runtime dependency mapped to
    /// its slotted identity. Sorted and de-duplicated.
    ///
    /// # Errors
    ///
    /// Fails if a runtime dependency cannot be resolved.
    pub fn dependency_list(&self, key: &PackageKey, spec: &PackageSpec) -> Result<Vec<String>> {
        let mut deps = BTreeSet::new();
        deps.insert(self.base_dependency.to_string());
        if let Some(config) = self.configs.lookup(key) {
            deps.extend(config.dependencies.iter().cloned());
        }
        for dep_key in self.resolver().dependency_keys(spec)? {
            deps.insert(self.naming.identity(&dep_key));
        }
        Ok(deps.into_iter().collect())
    }
}
