//! Parameters handed to the build descriptor renderer.

use std::collections::{BTreeMap, BTreeSet};

use ingot_schema::{PackageKey, PackageName, Sha256Hash, Slot, Version};
use serde::Serialize;

use crate::manifest::{PackageConfig, PatchFile};
use crate::spec::PackageSpec;

/// Directories of an installed package that are always kept.
pub const PRESERVED_PATHS: [&str; 2] = ["bin", "lib"];

/// Architecture tag of packages without native code.
pub const ARCH_ANY: &str = "any";

/// Patch applied before packaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchParams {
    /// File name of the patch as placed next to the descriptor.
    pub file_name: String,
    /// Content hash of the patch.
    pub sha256: Sha256Hash,
}

/// Everything the renderer needs for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorParams {
    /// Target identity.
    pub identity: String,
    /// Upstream name.
    pub name: PackageName,
    /// Coexistence slot, `None` for the head package.
    pub slot: Option<Slot>,
    /// Upstream version.
    pub version: Version,
    /// Build revision of this version.
    pub build_revision: u32,
    /// Declared licenses.
    pub licenses: Vec<String>,
    /// Project homepage.
    pub homepage: String,
    /// One-line description.
    pub summary: String,
    /// Target identities this package depends on.
    pub dependencies: Vec<String>,
    /// Top-level directories of the installed package to keep.
    pub preserved_paths: Vec<String>,
    /// License texts installed alongside the package.
    pub license_files: Vec<String>,
    /// Patch applied before packaging.
    pub patch: Option<PatchParams>,
    /// Whether installed executables are removed.
    pub remove_binaries: bool,
    /// Files renamed while packaging.
    pub rename: BTreeMap<String, String>,
    /// Extra installer arguments.
    pub install_args: Vec<String>,
    /// Architecture tag.
    pub arch: String,
    /// Content hash of the upstream artifact.
    pub source_sha256: Sha256Hash,
    /// Name of the artifact the build must produce.
    pub artifact_filename: String,
}

/// Build settings that are the same for every package in a run.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSettings<'a> {
    /// Architecture of packages with native extensions.
    pub target_arch: &'a str,
    /// Artifact file extension, without the leading dot.
    pub artifact_extension: &'a str,
    /// Packages whose executables clash with another package's.
    pub conflicting_names: &'a BTreeSet<String>,
}

/// Per-package inputs for [`DescriptorParams::compute`].
#[derive(Debug, Clone, Copy)]
pub struct DescriptorInputs<'a> {
    /// Package identity.
    pub key: &'a PackageKey,
    /// Target identity of `key`.
    pub identity: &'a str,
    /// Upstream metadata merged with the artifact manifest.
    pub spec: &'a PackageSpec,
    /// Build revision.
    pub build_revision: u32,
    /// Generated dependency list.
    pub dependencies: &'a [String],
    /// Override for this package.
    pub config: Option<&'a PackageConfig>,
    /// Patch for this package.
    pub patch: Option<&'a PatchFile>,
    /// Content hash of the fetched artifact.
    pub source_sha256: &'a Sha256Hash,
}

/// `<identity>-<version>-<revision>-<arch>.<extension>`
pub fn artifact_filename(
    identity: &str,
    version: &Version,
    build_revision: u32,
    arch: &str,
    extension: &str,
) -> String {
    format!("{identity}-{version}-{build_revision}-{arch}.{extension}")
}

impl DescriptorParams {
    /// Derive the renderer parameters for one build.
    pub fn compute(inputs: &DescriptorInputs<'_>, settings: &DescriptorSettings<'_>) -> Self {
        let DescriptorInputs {
            key,
            identity,
            spec,
            build_revision,
            dependencies,
            config,
            patch,
            source_sha256,
        } = *inputs;

        let arch = if spec.has_extensions {
            settings.target_arch
        } else {
            ARCH_ANY
        };

        let licenses = if spec.licenses.is_empty() {
            config.map(|c| c.licenses.clone()).unwrap_or_default()
        } else {
            spec.licenses.clone()
        };

        let mut preserved_paths: Vec<String> = PRESERVED_PATHS.iter().map(ToString::to_string).collect();
        if let Some(config) = config {
            preserved_paths.extend(
                config
                    .include
                    .iter()
                    .filter(|d| !PRESERVED_PATHS.contains(&d.as_str()))
                    .cloned(),
            );
        }

        let remove_binaries = (key.slot.is_some() || settings.conflicting_names.contains(key.name.as_str()))
            && !spec.executables.is_empty();

        Self {
            identity: identity.to_string(),
            name: key.name.clone(),
            slot: key.slot.clone(),
            version: spec.version.clone(),
            build_revision,
            licenses,
            homepage: spec.homepage.clone(),
            summary: spec.summary.clone(),
            dependencies: dependencies.to_vec(),
            preserved_paths,
            license_files: spec.license_files(),
            patch: patch.map(|p| PatchParams {
                file_name: format!("{}.patch", key.name),
                sha256: p.sha256.clone(),
            }),
            remove_binaries,
            rename: config.map(|c| c.rename.clone()).unwrap_or_default(),
            install_args: config.map(|c| c.install_args.clone()).unwrap_or_default(),
            arch: arch.to_string(),
            source_sha256: source_sha256.clone(),
            artifact_filename: artifact_filename(
                identity,
                &spec.version,
                build_revision,
                arch,
                settings.artifact_extension,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> PackageSpec {
        PackageSpec {
            name: PackageName::new(name),
            version: Version::new("2.2.8"),
            summary: "A modular Ruby webserver interface".into(),
            homepage: "https://github.com/rack/rack".into(),
            executables: vec!["rackup".into()],
            files: vec!["MIT-LICENSE".into(), "lib/rack.rb".into()],
            ..PackageSpec::default()
        }
    }

    #[test]
    fn test_head_package_params() {
        let key = PackageKey::head("rack");
        let spec = spec("rack");
        let deps = vec!["ruby".to_string()];
        let hash = Sha256Hash::compute(b"gem");
        let inputs = DescriptorInputs {
            key: &key,
            identity: "ruby-rack",
            spec: &spec,
            build_revision: 2,
            dependencies: &deps,
            config: None,
            patch: None,
            source_sha256: &hash,
        };
        let settings = DescriptorSettings {
            target_arch: "x86_64",
            artifact_extension: "pkg.tar.xz",
            conflicting_names: &BTreeSet::new(),
        };

        let params = DescriptorParams::compute(&inputs, &settings);
        assert_eq!(params.arch, "any");
        assert_eq!(params.artifact_filename, "ruby-rack-2.2.8-2-any.pkg.tar.xz");
        assert_eq!(params.preserved_paths, vec!["bin", "lib"]);
        assert_eq!(params.license_files, vec!["MIT-LICENSE"]);
        assert!(!params.remove_binaries);
        assert!(params.licenses.is_empty());
    }

    #[test]
    fn test_slotted_native_package_with_config() {
        let key = PackageKey::slotted("rack", "1");
        let mut spec = spec("rack");
        spec.has_extensions = true;
        let config = PackageConfig {
            include: vec!["ext".into(), "lib".into()],
            licenses: vec!["MIT".into()],
            install_args: vec!["--no-wrappers".into()],
            ..PackageConfig::default()
        };
        let patch = PatchFile {
            path: "config.pkg/rack.patch".into(),
            sha256: Sha256Hash::compute(b"patch"),
        };
        let hash = Sha256Hash::compute(b"gem");
        let inputs = DescriptorInputs {
            key: &key,
            identity: "ruby-rack-1",
            spec: &spec,
            build_revision: 1,
            dependencies: &[],
            config: Some(&config),
            patch: Some(&patch),
            source_sha256: &hash,
        };
        let settings = DescriptorSettings {
            target_arch: "x86_64",
            artifact_extension: "pkg.tar.zst",
            conflicting_names: &BTreeSet::new(),
        };

        let params = DescriptorParams::compute(&inputs, &settings);
        assert_eq!(params.artifact_filename, "ruby-rack-1-2.2.8-1-x86_64.pkg.tar.zst");
        assert_eq!(params.preserved_paths, vec!["bin", "lib", "ext"]);
        assert_eq!(params.licenses, vec!["MIT"]);
        assert_eq!(params.install_args, vec!["--no-wrappers"]);
        assert!(params.remove_binaries);
        assert_eq!(params.patch.unwrap().file_name, "rack.patch");
    }

    #[test]
    fn test_conflicting_head_removes_binaries() {
        let key = PackageKey::head("rake");
        let spec = spec("rake");
        let hash = Sha256Hash::compute(b"gem");
        let inputs = DescriptorInputs {
            key: &key,
            identity: "ruby-rake",
            spec: &spec,
            build_revision: 1,
            dependencies: &[],
            config: None,
            patch: None,
            source_sha256: &hash,
        };
        let settings = DescriptorSettings {
            target_arch: "x86_64",
            artifact_extension: "pkg.tar.xz",
            conflicting_names: &BTreeSet::from(["rake".to_string()]),
        };
        assert!(DescriptorParams::compute(&inputs, &settings).remove_binaries);
    }
}
