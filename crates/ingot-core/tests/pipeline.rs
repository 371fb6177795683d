//! End-to-end runs against in-memory collaborators and an on-disk
//! repository fixture.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use ingot_core::descriptor::DescriptorSettings;
use ingot_core::engine::{self, Engine, PackageLists};
use ingot_core::executor::{BuildExecutor, Collaborators};
use ingot_core::index::{ChannelListing, IndexedVersion, VersionIndex};
use ingot_core::io::{
    ArchiveManifest, BuildRequest, FetchedArtifact, Fetcher, RepositoryDatabase, SandboxBuilder,
    SandboxSync, Signer, SpecSource,
};
use ingot_core::manifest::PackageConfigs;
use ingot_core::publish::PublishCoordinator;
use ingot_core::render::PkgbuildRenderer;
use ingot_core::repo::LoadedRepository;
use ingot_core::retention::RetentionAnalyzer;
use ingot_core::spec::{DependencyRequirement, PackageSpec, SpecCatalog};
use ingot_core::{EngineError, Layout, NullReporter};
use ingot_schema::{PackageKey, PackageName, Sha256Hash, TargetNaming, Version};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeRegistry {
    specs: HashMap<(String, String), PackageSpec>,
}

impl FakeRegistry {
    fn publish(&mut self, name: &str, version: &str, deps: &[(&str, &str)]) {
        let spec = PackageSpec {
            name: PackageName::new(name),
            version: Version::new(version),
            summary: format!("{name} summary"),
            runtime_dependencies: deps
                .iter()
                .map(|(n, r)| DependencyRequirement::new(*n, r.parse().unwrap()))
                .collect(),
            sha256: Some(Sha256Hash::compute(gem_bytes(name, version).as_bytes())),
            ..PackageSpec::default()
        };
        self.specs
            .insert((name.to_string(), version.to_string()), spec);
    }
}

#[async_trait]
impl SpecSource for FakeRegistry {
    async fn fetch_spec(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> anyhow::Result<PackageSpec> {
        self.specs
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("404 {name} {version}"))
    }
}

fn gem_bytes(name: &str, version: &str) -> String {
    format!("{name}-{version}")
}

#[derive(Default)]
struct FakeFetcher {
    embedded_version: Option<String>,
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        name: &PackageName,
        version: &Version,
        dest_dir: &Path,
    ) -> anyhow::Result<FetchedArtifact> {
        std::fs::create_dir_all(dest_dir)?;
        let content = gem_bytes(name, version);
        let path = dest_dir.join(format!("{content}.gem"));
        std::fs::write(&path, &content)?;
        let embedded = self
            .embedded_version
            .as_deref()
            .map_or_else(|| version.clone(), Version::new);
        Ok(FetchedArtifact {
            path,
            sha256: Sha256Hash::compute(content.as_bytes()),
            manifest: ArchiveManifest {
                version: embedded,
                executables: Vec::new(),
                has_extensions: false,
                files: vec!["LICENSE".into()],
            },
        })
    }
}

/// Produces `<pkgname>-<pkgver>-<pkgrel>-any.pkg.tar.xz` from the rendered
/// descriptor, unless the package is listed in `broken`.
#[derive(Default)]
struct FakeBuilder {
    broken: BTreeSet<String>,
    built: Mutex<Vec<String>>,
}

fn descriptor_field<'d>(descriptor: &'d str, field: &str) -> &'d str {
    descriptor
        .lines()
        .find_map(|l| l.strip_prefix(&format!("{field}=")))
        .unwrap()
        .trim_matches('\'')
}

#[async_trait]
impl SandboxBuilder for FakeBuilder {
    async fn build(&self, request: &BuildRequest<'_>) -> anyhow::Result<()> {
        std::fs::create_dir_all(request.work_dir)?;
        let name = descriptor_field(request.descriptor, "pkgname");
        self.built.lock().unwrap().push(name.to_string());
        if self.broken.contains(name) {
            return Ok(());
        }
        let file = format!(
            "{name}-{}-{}-any.pkg.tar.xz",
            descriptor_field(request.descriptor, "pkgver"),
            descriptor_field(request.descriptor, "pkgrel"),
        );
        std::fs::write(request.work_dir.join(file), "pkg")?;
        Ok(())
    }
}

struct FakeSigner;

#[async_trait]
impl Signer for FakeSigner {
    async fn sign(&self, artifact: &Path) -> anyhow::Result<PathBuf> {
        let sig = PathBuf::from(format!("{}.sig", artifact.display()));
        std::fs::write(&sig, "sig")?;
        Ok(sig)
    }
}

struct FakeDatabase {
    db_file: PathBuf,
    added: Mutex<Vec<PathBuf>>,
    removed: Mutex<Vec<String>>,
}

impl FakeDatabase {
    fn new(layout: &Layout) -> Self {
        Self {
            db_file: layout.db_file(),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RepositoryDatabase for FakeDatabase {
    async fn extract(&self, dest: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dest)?;
        Ok(())
    }

    async fn add_entry(&self, artifact: &Path) -> anyhow::Result<()> {
        anyhow::ensure!(artifact.is_file(), "repo-add on missing {}", artifact.display());
        std::fs::write(&self.db_file, artifact.display().to_string())?;
        self.added.lock().unwrap().push(artifact.to_path_buf());
        Ok(())
    }

    async fn remove_entries(&self, identities: &[String]) -> anyhow::Result<()> {
        self.removed.lock().unwrap().extend_from_slice(identities);
        Ok(())
    }
}

/// Records which artifacts storage held at every sync.
#[derive(Default)]
struct FakeSandbox {
    seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl SandboxSync for FakeSandbox {
    async fn sync(&self, storage_dir: &Path) -> anyhow::Result<()> {
        let artifacts = std::fs::read_dir(storage_dir)?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".pkg.tar.xz"))
            .count();
        self.seen.lock().unwrap().push(artifacts);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    _tmp: TempDir,
    layout: Layout,
    index: VersionIndex,
    registry: FakeRegistry,
    naming: TargetNaming,
    configs: PackageConfigs,
    conflicting: BTreeSet<String>,
}

fn listing(entries: &[(&str, &[&str])]) -> ChannelListing {
    entries
        .iter()
        .map(|(n, vs)| {
            (
                PackageName::new(n),
                vs.iter().map(|v| IndexedVersion::new(v)).collect(),
            )
        })
        .collect()
}

impl Fixture {
    /// `pkga 2.0` depends on `pkgb ~> 1.0`; `pkgb` has 1.0, 1.5 and 2.0;
    /// `pkgc` has 1.0 and 1.1 and no dependencies.
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path().join("index"), tmp.path().join("work"), "quarry");
        layout.reset_work_dir().unwrap();

        let index = VersionIndex::new(
            listing(&[
                ("pkga", &["1.0", "2.0"]),
                ("pkgb", &["1.0", "1.5", "2.0"]),
                ("pkgc", &["1.0", "1.1"]),
            ]),
            ChannelListing::new(),
            None,
        );
        let mut registry = FakeRegistry::default();
        registry.publish("pkga", "1.0", &[]);
        registry.publish("pkga", "2.0", &[("pkgb", "~> 1.0")]);
        registry.publish("pkgb", "1.0", &[]);
        registry.publish("pkgb", "1.5", &[]);
        registry.publish("pkgb", "2.0", &[]);
        registry.publish("pkgc", "1.0", &[]);
        registry.publish("pkgc", "1.1", &[]);

        Self {
            _tmp: tmp,
            layout,
            index,
            registry,
            naming: TargetNaming::default(),
            configs: PackageConfigs::empty(),
            conflicting: BTreeSet::new(),
        }
    }

    fn engine(&self) -> Engine<'_> {
        Engine {
            index: &self.index,
            naming: &self.naming,
            configs: &self.configs,
            base_dependency: "ruby",
            source: &self.registry,
            concurrency: 4,
        }
    }

    fn lists(&self, whitelist: &[PackageKey]) -> PackageLists {
        PackageLists {
            whitelist: whitelist.to_vec(),
            ..PackageLists::default()
        }
    }

    fn settings(&self) -> DescriptorSettings<'_> {
        DescriptorSettings {
            target_arch: "x86_64",
            artifact_extension: "pkg.tar.xz",
            conflicting_names: &self.conflicting,
        }
    }

    /// Write an unpacked database entry the way `repo-add` lays it out.
    fn write_entry(&self, identity: &str, version_revision: &str, deps: &[&str]) {
        let entry = self
            .layout
            .extracted_db_dir()
            .join(format!("{identity}-{version_revision}"));
        std::fs::create_dir_all(&entry).unwrap();
        let mut desc = format!(
            "%FILENAME%\n{identity}-{version_revision}-any.pkg.tar.xz\n\n%NAME%\n{identity}\n\n%VERSION%\n{version_revision}\n\n"
        );
        desc.push_str("%DEPENDS%\n");
        for d in deps {
            desc.push_str(d);
            desc.push('\n');
        }
        std::fs::write(entry.join("desc"), desc).unwrap();
    }
}

struct Tools {
    fetcher: FakeFetcher,
    renderer: PkgbuildRenderer,
    builder: FakeBuilder,
    database: FakeDatabase,
    sandbox: FakeSandbox,
}

impl Tools {
    fn new(layout: &Layout) -> Self {
        Self {
            fetcher: FakeFetcher::default(),
            renderer: PkgbuildRenderer::new(
                "https://rubygems.org/downloads",
                "/usr/lib/ruby/gems/3.3.0",
                "/usr/lib/ruby/gems/3.3.0/extensions/x86_64-linux/3.3.0",
            ),
            builder: FakeBuilder::default(),
            database: FakeDatabase::new(layout),
            sandbox: FakeSandbox::default(),
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            fetcher: &self.fetcher,
            renderer: &self.renderer,
            builder: &self.builder,
            signer: &FakeSigner,
            database: &self.database,
            sandbox: Some(&self.sandbox),
        }
    }
}

async fn load(fx: &Fixture, tools: &Tools) -> LoadedRepository {
    engine::load_repository(&tools.database, &fx.layout, &fx.naming, &fx.index)
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fresh_run_builds_dependency_first() {
    let fx = Fixture::new();
    let tools = Tools::new(&fx.layout);
    let engine = fx.engine();
    let mut catalog = SpecCatalog::new();
    let mut repo = load(&fx, &tools).await;

    let plan = engine
        .plan(&mut catalog, &repo, &fx.lists(&[PackageKey::head("pkga")]))
        .await
        .unwrap();
    assert_eq!(
        plan.order,
        vec![PackageKey::slotted("pkgb", "1"), PackageKey::head("pkga")]
    );

    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &fx.layout,
        fx.settings(),
        tools.collaborators(),
        &NullReporter,
    );
    let built = executor.execute(&mut repo.state, &plan.order).await.unwrap();

    assert_eq!(built[0].identity, "ruby-pkgb-1");
    assert_eq!(built[0].version, "1.5");
    assert_eq!(built[1].filename, "ruby-pkga-2.0-1-any.pkg.tar.xz");

    let pkga = repo.state.get(&PackageKey::head("pkga")).unwrap();
    assert_eq!(pkga.dependencies, vec!["ruby", "ruby-pkgb-1"]);
    assert!(fx.layout.storage_dir().join("ruby-pkgb-1-1.5-1-any.pkg.tar.xz").is_file());
    assert!(fx.layout.storage_dir().join("ruby-pkgb-1-1.5-1-any.pkg.tar.xz.sig").is_file());

    // Each sync saw every artifact published so far.
    assert_eq!(*tools.sandbox.seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(tools.database.added.lock().unwrap().len(), 2);

    let marker = PublishCoordinator::new(&fx.layout, None)
        .finish(built.len())
        .await
        .unwrap();
    assert!(marker.is_some());
    assert!(fx.layout.marker_file().is_file());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fx = Fixture::new();
    let tools = Tools::new(&fx.layout);
    let engine = fx.engine();
    let lists = fx.lists(&[PackageKey::head("pkga")]);
    let mut catalog = SpecCatalog::new();
    let mut repo = load(&fx, &tools).await;

    let plan = engine.plan(&mut catalog, &repo, &lists).await.unwrap();
    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &fx.layout,
        fx.settings(),
        tools.collaborators(),
        &NullReporter,
    );
    executor.execute(&mut repo.state, &plan.order).await.unwrap();

    let mut catalog = SpecCatalog::new();
    let again = engine.plan(&mut catalog, &repo, &lists).await.unwrap();
    assert!(again.staleness.outdated.is_empty());
    assert!(again.staleness.changed.is_empty());
    assert!(again.order.is_empty());

    let published = PublishCoordinator::new(&fx.layout, None)
        .finish(again.order.len())
        .await
        .unwrap();
    assert_eq!(published, None);
}

#[tokio::test]
async fn test_changed_dependencies_bump_revision() {
    let fx = Fixture::new();
    fx.write_entry("ruby-pkgb-1", "1.5-1", &["ruby"]);
    fx.write_entry("ruby-pkga", "2.0-1", &["ruby"]);
    let tools = Tools::new(&fx.layout);
    let engine = fx.engine();
    let mut catalog = SpecCatalog::new();
    let mut repo = load(&fx, &tools).await;

    let plan = engine
        .plan(&mut catalog, &repo, &fx.lists(&[PackageKey::head("pkga")]))
        .await
        .unwrap();
    assert_eq!(plan.staleness.changed, vec![PackageKey::head("pkga")]);
    assert_eq!(plan.order, vec![PackageKey::head("pkga")]);

    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &fx.layout,
        fx.settings(),
        tools.collaborators(),
        &NullReporter,
    );
    let built = executor.execute(&mut repo.state, &plan.order).await.unwrap();
    assert_eq!(built[0].build_revision, 2);
    assert_eq!(built[0].filename, "ruby-pkga-2.0-2-any.pkg.tar.xz");
}

#[tokio::test]
async fn test_outdated_entry_resets_revision() {
    let fx = Fixture::new();
    fx.write_entry("ruby-pkgb-1", "1.0-3", &["ruby"]);
    let tools = Tools::new(&fx.layout);
    let engine = fx.engine();
    let mut catalog = SpecCatalog::new();
    let mut repo = load(&fx, &tools).await;

    let plan = engine
        .plan(&mut catalog, &repo, &fx.lists(&[]))
        .await
        .unwrap();
    assert_eq!(plan.staleness.outdated, vec![PackageKey::slotted("pkgb", "1")]);

    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &fx.layout,
        fx.settings(),
        tools.collaborators(),
        &NullReporter,
    );
    let built = executor.execute(&mut repo.state, &plan.order).await.unwrap();
    assert_eq!(built[0].version, "1.5");
    assert_eq!(built[0].build_revision, 1);
}

#[tokio::test]
async fn test_build_failure_keeps_published_prefix() {
    let fx = Fixture::new();
    let mut tools = Tools::new(&fx.layout);
    tools.builder.broken.insert("ruby-pkga".into());
    let engine = fx.engine();
    let mut catalog = SpecCatalog::new();
    let mut repo = load(&fx, &tools).await;

    let plan = engine
        .plan(&mut catalog, &repo, &fx.lists(&[PackageKey::head("pkga")]))
        .await
        .unwrap();
    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &fx.layout,
        fx.settings(),
        tools.collaborators(),
        &NullReporter,
    );
    let err = executor
        .execute(&mut repo.state, &plan.order)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::BuildFailure(ref f) if f == "ruby-pkga-2.0-1-any.pkg.tar.xz"));
    assert!(repo.state.contains(&PackageKey::slotted("pkgb", "1")));
    assert!(!repo.state.contains(&PackageKey::head("pkga")));
    assert_eq!(tools.database.added.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_version_mismatch_aborts_before_build() {
    let fx = Fixture::new();
    let mut tools = Tools::new(&fx.layout);
    tools.fetcher.embedded_version = Some("9.9".into());
    let engine = fx.engine();
    let mut catalog = SpecCatalog::new();
    let mut repo = load(&fx, &tools).await;

    let plan = engine
        .plan(&mut catalog, &repo, &fx.lists(&[PackageKey::head("pkga")]))
        .await
        .unwrap();
    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &fx.layout,
        fx.settings(),
        tools.collaborators(),
        &NullReporter,
    );
    let err = executor
        .execute(&mut repo.state, &plan.order)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::VersionMismatch { .. }));
    assert!(tools.builder.built.lock().unwrap().is_empty());
    assert!(repo.state.is_empty());
}

#[tokio::test]
async fn test_cleanup_drops_unneeded_slot_and_orphans() {
    let fx = Fixture::new();
    fx.write_entry("ruby-pkga", "2.0-1", &["ruby", "ruby-pkgb-1"]);
    fx.write_entry("ruby-pkgb-1", "1.5-1", &["ruby"]);
    fx.write_entry("ruby-pkgb-1.0", "1.0-1", &["ruby"]);
    std::fs::write(fx.layout.storage_dir().join("ruby-pkga-2.0-1-any.pkg.tar.xz"), "").unwrap();
    std::fs::write(fx.layout.storage_dir().join("ruby-pkga-1.0-1-any.pkg.tar.xz"), "").unwrap();
    let tools = Tools::new(&fx.layout);
    let repo = load(&fx, &tools).await;

    let analyzer = RetentionAnalyzer {
        naming: &fx.naming,
        artifact_extension: "pkg.tar.xz",
    };
    let plan = analyzer
        .analyze(&repo, &[], &BTreeSet::new(), fx.layout.storage_dir())
        .unwrap();
    assert_eq!(plan.drop_entries, vec![PackageKey::slotted("pkgb", "1.0")]);
    assert_eq!(
        plan.delete_files,
        vec![fx.layout.storage_dir().join("ruby-pkga-1.0-1-any.pkg.tar.xz")]
    );

    engine::apply_retention(&plan, &tools.database, &fx.naming)
        .await
        .unwrap();
    assert_eq!(*tools.database.removed.lock().unwrap(), vec!["ruby-pkgb-1.0"]);
    assert!(!fx.layout.storage_dir().join("ruby-pkga-1.0-1-any.pkg.tar.xz").exists());
}

#[tokio::test]
async fn test_outdated_head_rebuilt_alone() {
    let fx = Fixture::new();
    fx.write_entry("ruby-pkgc", "1.0-1", &["ruby"]);
    let tools = Tools::new(&fx.layout);
    let engine = fx.engine();
    let mut catalog = SpecCatalog::new();
    let mut repo = load(&fx, &tools).await;

    let plan = engine
        .plan(&mut catalog, &repo, &fx.lists(&[PackageKey::head("pkgc")]))
        .await
        .unwrap();
    assert_eq!(plan.staleness.outdated, vec![PackageKey::head("pkgc")]);
    assert!(plan.staleness.changed.is_empty());
    assert_eq!(plan.order, vec![PackageKey::head("pkgc")]);

    let executor = BuildExecutor::new(
        engine.context(&catalog),
        &fx.layout,
        fx.settings(),
        tools.collaborators(),
        &NullReporter,
    );
    let built = executor.execute(&mut repo.state, &plan.order).await.unwrap();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].identity, "ruby-pkgc");
    assert_eq!(built[0].version, "1.1");
    assert_eq!(built[0].build_revision, 1);

    let record = repo.state.get(&PackageKey::head("pkgc")).unwrap();
    assert_eq!(record.version, "1.1");
    assert_eq!(record.build_revision, 1);
}
