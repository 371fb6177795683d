//! Everything a command needs, loaded from `ingot.toml`.

use std::path::Path;

use anyhow::{Context, Result};
use ingot_core::builder::MakepkgBuilder;
use ingot_core::descriptor::DescriptorSettings;
use ingot_core::engine::{self, PackageLists};
use ingot_core::executor::Collaborators;
use ingot_core::index::VersionIndex;
use ingot_core::io::{
    ChrootSync, GpgSigner, HttpFetcher, HttpSpecSource, JsonIndexLoader, MirrorSync, RepoTool,
    RsyncMirror, SandboxSync,
};
use ingot_core::manifest::PackageConfigs;
use ingot_core::render::PkgbuildRenderer;
use ingot_core::repo::LoadedRepository;
use ingot_core::{Engine, Layout, Settings};
use ingot_schema::TargetNaming;
use reqwest::Client;
use tracing::debug;

/// Load settings from `path`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    Settings::load(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Load both channels of the registry snapshot named in `settings`.
pub async fn load_index(settings: &Settings) -> Result<VersionIndex> {
    let loader = JsonIndexLoader::new(&settings.snapshot_dir, &settings.platforms);
    VersionIndex::load(&loader, settings.runtime())
        .await
        .context("failed to load registry snapshot")
}

/// Loaded configuration plus the adapters shared by every command.
#[derive(Debug)]
pub struct Session {
    /// Parsed `ingot.toml`.
    pub settings: Settings,
    /// Repository and scratch directories.
    pub layout: Layout,
    /// Target naming scheme.
    pub naming: TargetNaming,
    /// Per-package overrides from `config.pkg/`.
    pub configs: PackageConfigs,
    /// Whitelist, rebuild, ignore and official lists.
    pub lists: PackageLists,
    /// Registry snapshot.
    pub index: VersionIndex,
    /// Registry metadata API.
    pub registry: HttpSpecSource,
    /// `repo-add` / `repo-remove` on the repository database.
    pub database: RepoTool,
}

impl Session {
    /// Load settings, overrides, package lists and the registry snapshot.
    pub async fn open(config: &Path) -> Result<Self> {
        let settings = load_settings(config)?;
        let layout = Layout::from_settings(&settings);
        let configs = PackageConfigs::load_dir(&settings.config_pkg_dir)
            .context("failed to load package overrides")?;
        let lists = PackageLists::load(&settings).context("failed to load package lists")?;
        let index = load_index(&settings).await?;
        let registry = HttpSpecSource::new(Client::new(), &settings.spec_endpoint);
        let database = RepoTool::new(layout.db_file());

        Ok(Self {
            naming: settings.naming(),
            settings,
            layout,
            configs,
            lists,
            index,
            registry,
            database,
        })
    }

    /// The planning engine over this session.
    pub fn engine(&self) -> Engine<'_> {
        Engine {
            index: &self.index,
            naming: &self.naming,
            configs: &self.configs,
            base_dependency: &self.settings.base_dependency,
            source: &self.registry,
            concurrency: self.settings.fetch_concurrency,
        }
    }

    /// Per-run descriptor settings.
    pub fn descriptor_settings(&self) -> DescriptorSettings<'_> {
        DescriptorSettings {
            target_arch: &self.settings.target_arch,
            artifact_extension: &self.settings.artifact_extension,
            conflicting_names: &self.settings.conflicting_names,
        }
    }

    /// Wipe the work directory and read the repository database.
    pub async fn load_repository(&self) -> Result<LoadedRepository> {
        self.layout
            .reset_work_dir()
            .with_context(|| format!("failed to reset {}", self.layout.work_dir().display()))?;
        engine::load_repository(&self.database, &self.layout, &self.naming, &self.index)
            .await
            .context("failed to load repository")
    }
}

/// Process-backed build adapters.
#[derive(Debug)]
pub struct BuildTools {
    fetcher: HttpFetcher,
    renderer: PkgbuildRenderer,
    builder: MakepkgBuilder,
    signer: GpgSigner,
    sandbox: Option<ChrootSync>,
    mirror: Option<RsyncMirror>,
}

impl BuildTools {
    /// Builds run in the chroot when `<chroot_dir>/root` exists, otherwise on
    /// the host without a sandbox refresh.
    pub fn from_settings(settings: &Settings, layout: &Layout) -> Self {
        let chrooted = settings.chroot_dir.join("root").is_dir();
        debug!(chrooted, chroot = %settings.chroot_dir.display(), "selecting builder");

        let (builder, sandbox) = if chrooted {
            (
                MakepkgBuilder::chroot(&settings.chroot_dir, layout.storage_dir()),
                Some(ChrootSync::new(&settings.chroot_dir)),
            )
        } else {
            (MakepkgBuilder::host(), None)
        };

        let db_file_name = format!("{}.db.tar.xz", settings.repo_name);
        let mirror = settings
            .mirror_destination
            .as_deref()
            .map(|dest| RsyncMirror::new(dest, &db_file_name));

        Self {
            fetcher: HttpFetcher::new(Client::new(), &settings.download_endpoint),
            renderer: PkgbuildRenderer::new(
                &settings.download_endpoint,
                &settings.gem_dir,
                &settings.extension_dir,
            ),
            builder,
            signer: GpgSigner::new(settings.signing_key.clone()),
            sandbox,
            mirror,
        }
    }

    /// The collaborators of one executor run.
    pub fn collaborators<'a>(&'a self, database: &'a RepoTool) -> Collaborators<'a> {
        Collaborators {
            fetcher: &self.fetcher,
            renderer: &self.renderer,
            builder: &self.builder,
            signer: &self.signer,
            database,
            sandbox: self.sandbox.as_ref().map(|s| s as &dyn SandboxSync),
        }
    }

    /// The public mirror, if one is configured.
    pub fn mirror(&self) -> Option<&dyn MirrorSync> {
        self.mirror.as_ref().map(|m| m as &dyn MirrorSync)
    }
}
