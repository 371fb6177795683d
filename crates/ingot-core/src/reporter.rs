//! Reporter trait for dependency injection
//!
//! Lets the engine report progress without being coupled to a terminal.

use ingot_schema::Version;

/// Progress sink for a mirror run.
pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Loading index", "Building").
    fn section(&self, title: &str);

    /// Build `position` of `total` is starting for target identity `identity`.
    fn building(&self, identity: &str, version: &Version, position: usize, total: usize);

    /// An artifact was published.
    fn built(&self, identity: &str, version: &Version, build_revision: u32);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a final summary.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn building(&self, identity: &str, version: &Version, position: usize, total: usize) {
        (**self).building(identity, version, position, total);
    }
    fn built(&self, identity: &str, version: &Version, build_revision: u32) {
        (**self).built(identity, version, build_revision);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g. testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn building(&self, _: &str, _: &Version, _: usize, _: usize) {}
    fn built(&self, _: &str, _: &Version, _: u32) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
