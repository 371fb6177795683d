//! Candidate selection and build ordering.
//!
//! Ordering works on a LIFO worklist. The top key is only popped once none
//! of its dependencies still waits in the queue or is missing from the
//! repository; otherwise those dependencies are moved (or added) above it
//! and the loop starts over. A slotted key additionally waits for its head
//! key, so the head package owns the shared files first.
//!
//! Hoisting loops forever on a dependency cycle, so [`BuildPlanner::order`]
//! refuses to run until [`BuildPlanner::check_cycles`] has passed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ingot_schema::{PackageKey, Version};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::index::VersionIndex;
use crate::io::SpecSource;
use crate::repo::RepositoryState;
use crate::slot::SlotResolver;
use crate::spec::SpecCatalog;

/// Resolved runtime dependencies of every key that may be built this run.
pub type DependencyMap = BTreeMap<PackageKey, Vec<PackageKey>>;

/// Operator and analyzer inputs merged into the candidate set.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
    /// Keys that must be present.
    pub whitelist: Vec<PackageKey>,
    /// Keys with a newer upstream version.
    pub outdated: Vec<PackageKey>,
    /// Keys whose dependency list changed.
    pub changed: Vec<PackageKey>,
    /// Keys rebuilt unconditionally.
    pub forced: Vec<PackageKey>,
    /// Keys never built.
    pub ignored: BTreeSet<PackageKey>,
}

/// `(whitelist - active) + outdated + changed + forced - ignored`, in that
/// order, keeping the first occurrence of each key.
pub fn candidates(state: &RepositoryState, inputs: &PlanInputs) -> Vec<PackageKey> {
    let missing = inputs.whitelist.iter().filter(|k| !state.contains(k));
    let mut seen = BTreeSet::new();

    missing
        .chain(&inputs.outdated)
        .chain(&inputs.changed)
        .chain(&inputs.forced)
        .filter(|k| !inputs.ignored.contains(*k))
        .filter(|k| seen.insert((*k).clone()))
        .cloned()
        .collect()
}

/// Orders candidates against the current repository.
#[derive(Debug, Clone, Copy)]
pub struct BuildPlanner<'a> {
    state: &'a RepositoryState,
    official: &'a BTreeSet<PackageKey>,
}

impl<'a> BuildPlanner<'a> {
    /// A planner for `state`, skipping everything in `official`.
    pub fn new(state: &'a RepositoryState, official: &'a BTreeSet<PackageKey>) -> Self {
        Self { state, official }
    }

    /// Resolve the dependencies of every candidate and, transitively, of
    /// every dependency that is not yet in the repository.
    ///
    /// Metadata is fetched breadth-first, one round per dependency level,
    /// with at most `concurrency` requests in flight.
    ///
    /// # Errors
    ///
    /// Fails on the first metadata fetch or resolution error.
    pub async fn resolve_dependencies(
        &self,
        index: &VersionIndex,
        catalog: &mut SpecCatalog,
        source: &dyn SpecSource,
        candidates: &[PackageKey],
        concurrency: usize,
    ) -> Result<DependencyMap> {
        let resolver = SlotResolver::new(index);
        let mut map = DependencyMap::new();
        let mut frontier: Vec<PackageKey> = candidates
            .iter()
            .filter(|k| !self.official.contains(*k))
            .cloned()
            .collect();

        while !frontier.is_empty() {
            let versions = frontier
                .iter()
                .map(|k| Ok((k.clone(), resolver.latest_in_slot(k)?)))
                .collect::<Result<Vec<(PackageKey, Version)>>>()?;
            catalog
                .prefetch(
                    source,
                    versions.iter().map(|(k, v)| (k.name.clone(), v.clone())),
                    concurrency,
                )
                .await?;

            let mut next = BTreeSet::new();
            for (key, version) in versions {
                let spec = catalog.get(&key.name, &version)?;
                let deps = resolver.dependency_keys(spec)?;
                next.extend(
                    deps.iter()
                        .filter(|d| **d != key)
                        .filter(|d| !self.official.contains(*d) && !self.state.contains(d))
                        .cloned(),
                );
                map.insert(key, deps);
            }

            frontier = next.into_iter().filter(|k| !map.contains_key(k)).collect();
        }

        debug!(keys = map.len(), "dependency closure resolved");
        Ok(map)
    }

    /// Dependencies of `key` that constrain ordering: resolved keys that are
    /// part of the closure, not officially provided and not `key` itself,
    /// plus the head key for a slotted key.
    fn ordering_edges<'m>(&self, map: &'m DependencyMap, key: &PackageKey) -> Vec<&'m PackageKey> {
        let mut edges: Vec<&PackageKey> = map
            .get(key)
            .into_iter()
            .flatten()
            .filter(|d| *d != key && !self.official.contains(*d) && map.contains_key(*d))
            .collect();
        let head = (!key.is_head()).then(|| key.to_head());
        if let Some((head, _)) = head.and_then(|h| map.get_key_value(&h)) {
            edges.push(head);
        }
        edges
    }

    /// Fail with [`EngineError::Cycle`] if the closure contains a cycle.
    ///
    /// The head edge of a slotted key is included whenever the head key is
    /// in the closure, which may reject a plan the hoisting loop would have
    /// finished.
    ///
    /// # Errors
    ///
    /// Returns the first cycle found, closed with its starting key.
    pub fn check_cycles(&self, map: &DependencyMap) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'m>(
            planner: &BuildPlanner<'_>,
            map: &'m DependencyMap,
            key: &'m PackageKey,
            marks: &mut HashMap<&'m PackageKey, Mark>,
            path: &mut Vec<&'m PackageKey>,
        ) -> Option<Vec<PackageKey>> {
            match marks.get(key) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|k| *k == key).unwrap_or(0);
                    let mut cycle: Vec<PackageKey> =
                        path[start..].iter().map(|k| (*k).clone()).collect();
                    cycle.push(key.clone());
                    return Some(cycle);
                }
                None => {}
            }

            marks.insert(key, Mark::Visiting);
            path.push(key);
            for dep in planner.ordering_edges(map, key) {
                if let Some(cycle) = visit(planner, map, dep, marks, path) {
                    return Some(cycle);
                }
            }
            path.pop();
            marks.insert(key, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for key in map.keys() {
            if let Some(cycle) = visit(self, map, key, &mut marks, &mut path) {
                return Err(EngineError::Cycle(cycle));
            }
        }
        Ok(())
    }

    /// The build order for `candidates`.
    ///
    /// Every dependency is built before its dependents, and a head key before
    /// any slotted key of the same name. Officially provided keys are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cycle`] for cyclic dependencies, or a
    /// resolution error if a queued key is missing from `map`.
    pub fn order(&self, candidates: &[PackageKey], map: &DependencyMap) -> Result<Vec<PackageKey>> {
        self.check_cycles(map)?;

        let mut queue: Vec<PackageKey> = candidates.to_vec();
        let mut built: BTreeSet<PackageKey> = BTreeSet::new();
        let mut order = Vec::new();

        while let Some(key) = queue.last().cloned() {
            if self.official.contains(&key) {
                queue.pop();
                continue;
            }

            let deps = map.get(&key).ok_or_else(|| {
                EngineError::resolution(&key.name, &key, "dependencies were not resolved")
            })?;

            let mut hoisted: Vec<PackageKey> = Vec::new();
            for dep in deps {
                if *dep == key || self.official.contains(dep) || hoisted.contains(dep) {
                    continue;
                }
                // `key` stays on top; everything under it shrinks as deps are pulled out.
                let below = queue.len() - 1;
                if let Some(pos) = queue[..below].iter().position(|q| q == dep) {
                    queue.remove(pos);
                    hoisted.push(dep.clone());
                } else if !self.state.contains(dep) && !built.contains(dep) {
                    hoisted.push(dep.clone());
                }
            }

            if !key.is_head() {
                let head = key.to_head();
                let below = queue.len() - 1;
                if let Some(pos) = queue[..below].iter().position(|q| *q == head) {
                    queue.remove(pos);
                    hoisted.push(head);
                }
            }

            if hoisted.is_empty() {
                queue.pop();
                debug!(%key, "scheduled");
                built.insert(key.clone());
                order.push(key);
            } else {
                debug!(%key, waiting_for = hoisted.len(), "hoisting prerequisites");
                queue.extend(hoisted);
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::PackageRecord;

    fn head(name: &str) -> PackageKey {
        PackageKey::head(name)
    }

    fn slotted(name: &str, slot: &str) -> PackageKey {
        PackageKey::slotted(name, slot)
    }

    fn active(keys: &[PackageKey]) -> RepositoryState {
        let mut state = RepositoryState::new();
        for key in keys {
            state.insert(
                key.clone(),
                PackageRecord {
                    version: Version::new("1.0"),
                    build_revision: 1,
                    dependencies: Vec::new(),
                    filename: String::new(),
                },
            );
        }
        state
    }

    fn deps(entries: &[(PackageKey, &[PackageKey])]) -> DependencyMap {
        entries.iter().map(|(k, d)| (k.clone(), d.to_vec())).collect()
    }

    fn position(order: &[PackageKey], key: &PackageKey) -> usize {
        order.iter().position(|k| k == key).unwrap()
    }

    #[test]
    fn test_candidates_merge_and_subtract() {
        let state = active(&[head("rack"), head("thor")]);
        let inputs = PlanInputs {
            whitelist: vec![head("rack"), head("rails"), head("sinatra")],
            outdated: vec![head("thor"), head("rails")],
            changed: vec![head("rack")],
            forced: vec![head("thor")],
            ignored: BTreeSet::from([head("sinatra")]),
        };
        assert_eq!(
            candidates(&state, &inputs),
            vec![head("rails"), head("thor"), head("rack")]
        );
    }

    #[test]
    fn test_unchanged_repository_has_no_candidates() {
        let state = active(&[head("rack")]);
        let inputs = PlanInputs {
            whitelist: vec![head("rack")],
            ..PlanInputs::default()
        };
        assert!(candidates(&state, &inputs).is_empty());
    }

    #[test]
    fn test_missing_dependency_hoisted() {
        // pkgB needs pkgA-1, which is neither queued nor published.
        let state = RepositoryState::new();
        let official = BTreeSet::new();
        let map = deps(&[
            (head("pkgB"), &[slotted("pkgA", "1")]),
            (slotted("pkgA", "1"), &[]),
        ]);
        let order = BuildPlanner::new(&state, &official)
            .order(&[head("pkgB")], &map)
            .unwrap();
        assert_eq!(order, vec![slotted("pkgA", "1"), head("pkgB")]);
    }

    #[test]
    fn test_queued_dependency_moved_ahead() {
        let state = active(&[head("rack")]);
        let official = BTreeSet::new();
        let map = deps(&[
            (head("rack"), &[]),
            (head("sinatra"), &[head("rack"), head("tilt")]),
            (head("tilt"), &[]),
        ]);
        // rack is outdated and queued first, so it would pop last without hoisting.
        let order = BuildPlanner::new(&state, &official)
            .order(&[head("rack"), head("sinatra")], &map)
            .unwrap();
        assert_eq!(order.len(), 3);
        assert!(position(&order, &head("rack")) < position(&order, &head("sinatra")));
        assert!(position(&order, &head("tilt")) < position(&order, &head("sinatra")));
    }

    #[test]
    fn test_several_queued_dependencies_moved_ahead() {
        // rails waits on two keys queued under it plus one that is not queued at all.
        let state = RepositoryState::new();
        let official = BTreeSet::new();
        let map = deps(&[
            (head("actionpack"), &[]),
            (head("activesupport"), &[]),
            (head("rails"), &[head("actionpack"), head("activesupport"), head("railties")]),
            (head("railties"), &[]),
        ]);
        let planned = [head("actionpack"), head("activesupport"), head("rails")];
        let order = BuildPlanner::new(&state, &official)
            .order(&planned, &map)
            .unwrap();
        assert_eq!(order.len(), 4);
        let rails = position(&order, &head("rails"));
        assert_eq!(rails, 3);
        for dep in [head("actionpack"), head("activesupport"), head("railties")] {
            assert!(position(&order, &dep) < rails, "{dep} after rails");
        }
    }

    #[test]
    fn test_head_before_slot() {
        let state = active(&[head("rack"), slotted("rack", "1")]);
        let official = BTreeSet::new();
        let map = deps(&[(head("rack"), &[]), (slotted("rack", "1"), &[])]);
        let order = BuildPlanner::new(&state, &official)
            .order(&[head("rack"), slotted("rack", "1")], &map)
            .unwrap();
        assert_eq!(order, vec![head("rack"), slotted("rack", "1")]);
    }

    #[test]
    fn test_active_dependency_not_rebuilt() {
        let state = active(&[head("rack")]);
        let official = BTreeSet::new();
        let map = deps(&[(head("sinatra"), &[head("rack")])]);
        let order = BuildPlanner::new(&state, &official)
            .order(&[head("sinatra")], &map)
            .unwrap();
        assert_eq!(order, vec![head("sinatra")]);
    }

    #[test]
    fn test_official_keys_skipped() {
        let state = RepositoryState::new();
        let official = BTreeSet::from([head("rake")]);
        let map = deps(&[(head("thor"), &[head("rake")])]);
        let order = BuildPlanner::new(&state, &official)
            .order(&[head("rake"), head("thor")], &map)
            .unwrap();
        assert_eq!(order, vec![head("thor")]);
    }

    #[test]
    fn test_self_dependency_ignored() {
        let state = RepositoryState::new();
        let official = BTreeSet::new();
        let map = deps(&[(head("odd"), &[head("odd")])]);
        let order = BuildPlanner::new(&state, &official)
            .order(&[head("odd")], &map)
            .unwrap();
        assert_eq!(order, vec![head("odd")]);
    }

    #[test]
    fn test_cycle_rejected() {
        let state = RepositoryState::new();
        let official = BTreeSet::new();
        let map = deps(&[
            (head("a"), &[head("b")]),
            (head("b"), &[slotted("c", "1")]),
            (slotted("c", "1"), &[head("a")]),
        ]);
        let err = BuildPlanner::new(&state, &official)
            .order(&[head("a")], &map)
            .unwrap_err();
        match err {
            EngineError::Cycle(keys) => {
                assert_eq!(keys.first(), keys.last());
                assert_eq!(keys.len(), 4);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_head_depending_on_own_slot_is_cycle() {
        let state = RepositoryState::new();
        let official = BTreeSet::new();
        let map = deps(&[
            (head("rails"), &[slotted("rails", "4")]),
            (slotted("rails", "4"), &[]),
        ]);
        let err = BuildPlanner::new(&state, &official)
            .order(&[head("rails")], &map)
            .unwrap_err();
        assert!(matches!(err, EngineError::Cycle(_)));
    }

    #[test]
    fn test_order_respects_every_dependency() {
        let state = active(&[head("json")]);
        let official = BTreeSet::new();
        let map = deps(&[
            (head("rails"), &[head("actionpack"), head("activesupport"), head("json")]),
            (head("actionpack"), &[head("rack"), head("activesupport")]),
            (head("activesupport"), &[head("i18n"), head("json")]),
            (head("rack"), &[]),
            (head("i18n"), &[]),
            (head("json"), &[]),
            (slotted("rack", "1"), &[]),
        ]);
        let planned = [slotted("rack", "1"), head("rails"), head("json"), head("rack")];
        let order = BuildPlanner::new(&state, &official)
            .order(&planned, &map)
            .unwrap();

        assert_eq!(order.len(), 7);
        for (key, key_deps) in &map {
            for dep in key_deps {
                if let (Some(k), Some(d)) = (
                    order.iter().position(|o| o == key),
                    order.iter().position(|o| o == dep),
                ) {
                    assert!(d < k, "{dep} must build before {key}");
                }
            }
        }
        assert!(position(&order, &head("rack")) < position(&order, &slotted("rack", "1")));
    }
}
