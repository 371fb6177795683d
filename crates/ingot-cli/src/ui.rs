//! Terminal output
//!
//! Progress goes to stdout through [`ConsoleReporter`]; warnings go to
//! stderr so they survive when stdout is piped.

use crossterm::style::Stylize;
use ingot_core::engine::RunPlan;
use ingot_core::retention::RetentionPlan;
use ingot_core::{Reporter, Warning};
use ingot_schema::{PackageKey, TargetNaming, Version};

/// Label column width.
const LABEL_WIDTH: usize = 12;

/// Plain-text [`Reporter`] for interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// A reporter writing to the terminal.
    pub fn new() -> Self {
        Self
    }

    /// Report every warning in `warnings`.
    pub fn warnings<'w>(&self, warnings: impl IntoIterator<Item = &'w Warning>) {
        for warning in warnings {
            self.warning(&warning.to_string());
        }
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        println!();
        println!("{}", title.bold());
    }

    fn building(&self, identity: &str, version: &Version, position: usize, total: usize) {
        let counter = format!("[{position}/{total}]");
        println!(
            "  {} {} {}",
            counter.dark_grey(),
            identity.white().bold(),
            version.as_str().dark_grey()
        );
    }

    fn built(&self, identity: &str, version: &Version, build_revision: u32) {
        println!("  {} {identity} {version}-{build_revision}", "✓".green());
    }

    fn info(&self, msg: &str) {
        println!("  {msg}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("  {} {msg}", "warning:".yellow());
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        let noun = if count == 1 { "package" } else { "packages" };
        println!();
        println!(
            "  {}",
            format!("{count} {noun} {action} in {elapsed_secs:.1}s").dark_grey()
        );
    }
}

fn print_identities(label: &str, keys: &[PackageKey], naming: &TargetNaming) {
    let label = format!("{label:<LABEL_WIDTH$}");
    println!("  {}{}", label.dark_grey(), keys.len());
    for key in keys {
        println!("    {}", naming.identity(key));
    }
}

/// Print the staleness findings and the build order of `plan`.
pub fn print_plan(plan: &RunPlan, naming: &TargetNaming) {
    print_identities("outdated", &plan.staleness.outdated, naming);
    print_identities("changed", &plan.staleness.changed, naming);
    print_identities("candidates", &plan.candidates, naming);
    print_identities("build order", &plan.order, naming);
}

/// Print the removal lists of `plan`.
pub fn print_retention(plan: &RetentionPlan, naming: &TargetNaming) {
    print_identities("entries", &plan.drop_entries, naming);

    let label = format!("{:<LABEL_WIDTH$}", "files");
    println!("  {}{}", label.dark_grey(), plan.delete_files.len());
    for file in &plan.delete_files {
        let name = file
            .file_name()
            .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
        println!("    {name}");
    }
}
