//! Default build descriptor: an Arch Linux `PKGBUILD` that installs one
//! upstream gem into the system gem directory.

use std::fmt::Write as _;

use crate::descriptor::DescriptorParams;
use crate::io::DescriptorRenderer;

/// Quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn shell_array<'s>(items: impl IntoIterator<Item = &'s String>) -> String {
    items
        .into_iter()
        .map(|s| shell_quote(s))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders [`DescriptorParams`] into a `PKGBUILD`.
#[derive(Debug, Clone)]
pub struct PkgbuildRenderer {
    download_endpoint: String,
    gem_dir: String,
    extension_dir: String,
}

impl PkgbuildRenderer {
    /// A renderer downloading from `download_endpoint` and installing into
    /// `gem_dir`, with compiled extensions under `extension_dir`.
    pub fn new(download_endpoint: &str, gem_dir: &str, extension_dir: &str) -> Self {
        Self {
            download_endpoint: download_endpoint.trim_end_matches('/').to_string(),
            gem_dir: gem_dir.to_string(),
            extension_dir: extension_dir.to_string(),
        }
    }
}

impl DescriptorRenderer for PkgbuildRenderer {
    fn render(&self, p: &DescriptorParams) -> anyhow::Result<String> {
        let mut out = String::new();
        let licenses = if p.licenses.is_empty() {
            "'unknown'".to_string()
        } else {
            shell_array(&p.licenses)
        };

        writeln!(out, "_gemname={}", shell_quote(p.name.as_str()))?;
        writeln!(out, "pkgname={}", shell_quote(&p.identity))?;
        writeln!(out, "pkgver={}", p.version)?;
        writeln!(out, "pkgrel={}", p.build_revision)?;
        writeln!(out, "pkgdesc={}", shell_quote(&p.summary))?;
        writeln!(out, "arch=({})", shell_quote(&p.arch))?;
        writeln!(out, "url={}", shell_quote(&p.homepage))?;
        writeln!(out, "license=({licenses})")?;
        writeln!(out, "depends=({})", shell_array(&p.dependencies))?;
        writeln!(out, "options=(!emptydirs)")?;

        let mut sources = vec![format!(
            "{}/$_gemname-$pkgver.gem",
            self.download_endpoint
        )];
        let mut sums = vec![p.source_sha256.to_string()];
        if let Some(patch) = &p.patch {
            sources.push(patch.file_name.clone());
            sums.push(patch.sha256.to_string());
        }
        writeln!(out, "source=({})", shell_array(&sources))?;
        writeln!(out, "noextract=(\"$_gemname-$pkgver.gem\")")?;
        writeln!(out, "sha256sums=({})", shell_array(&sums))?;

        if let Some(patch) = &p.patch {
            out.push_str("\nprepare() {\n");
            out.push_str("  rm -rf \"$_gemname-$pkgver\"\n");
            out.push_str("  gem unpack \"$_gemname-$pkgver.gem\"\n");
            out.push_str("  cd \"$_gemname-$pkgver\"\n");
            writeln!(out, "  patch -p1 < \"$srcdir\"/{}", shell_quote(&patch.file_name))?;
            out.push_str("  gem build \"$_gemname.gemspec\"\n");
            out.push_str("  mv \"$_gemname-$pkgver.gem\" ..\n");
            out.push_str("}\n");
        }

        out.push_str("\npackage() {\n");
        writeln!(out, "  local _gemdir={}", shell_quote(&self.gem_dir))?;
        let extra_args = if p.install_args.is_empty() {
            String::new()
        } else {
            format!(" {}", shell_array(&p.install_args))
        };
        writeln!(
            out,
            "  gem install --ignore-dependencies --no-document --no-user-install -i \"$pkgdir/$_gemdir\" -n \"$pkgdir/usr/bin\"{extra_args} \"$_gemname-$pkgver.gem\""
        )?;
        out.push_str("  rm \"$pkgdir/$_gemdir/cache/$_gemname-$pkgver.gem\"\n");

        for file in &p.license_files {
            let quoted = shell_quote(file);
            writeln!(
                out,
                "  install -D -m644 \"$pkgdir/$_gemdir/gems/$_gemname-$pkgver\"/{quoted} \"$pkgdir/usr/share/licenses/$pkgname\"/{quoted}"
            )?;
        }

        for (from, to) in &p.rename {
            writeln!(
                out,
                "  mv \"$pkgdir\"/{} \"$pkgdir\"/{}",
                shell_quote(from),
                shell_quote(to)
            )?;
        }

        if p.remove_binaries {
            out.push_str("  rm -rf \"$pkgdir/usr/bin\"\n");
        }

        writeln!(
            out,
            "  local _extdir=\"$pkgdir\"/{}\"/$_gemname-$pkgver\"",
            shell_quote(&self.extension_dir)
        )?;
        out.push_str("  if [ -d \"$_extdir\" ]; then\n");
        out.push_str("    rm -rf \"$_extdir\"/*\n");
        out.push_str("    touch \"$_extdir/gem.build_complete\"\n");
        out.push_str("  fi\n");

        let keep: Vec<String> = p
            .preserved_paths
            .iter()
            .map(|d| format!("! -name {}", shell_quote(d)))
            .collect();
        writeln!(
            out,
            "  find \"$pkgdir/$_gemdir/gems/$_gemname-$pkgver\" -mindepth 1 -maxdepth 1 {} -exec rm -r {{}} \\;",
            keep.join(" ")
        )?;
        out.push_str("}\n");

        Ok(out)
    }
}
