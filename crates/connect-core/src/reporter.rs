//! Reporter trait for dependency injection
//!
//! This trait allows core logic to report progress and status without
//! being coupled to a specific console or GUI implementation.

use connect_schema::PackageName;

pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Loading channel", "Installing").
    fn section(&self, title: &str);

    /// Updates the progress of a download.
    fn downloading(&self, name: &PackageName, version: &str, current: u64, total: Option<u64>);

    /// Updates the state of a package to 'extracting'.
    fn extracting(&self, name: &PackageName, version: &str);

    /// Updates the state of a package to 'installing'.
    fn installing(&self, name: &PackageName, version: &str);

    /// Updates the state of a package to 'removing'.
    fn removing(&self, name: &PackageName, version: &str);

    /// Marks a package operation as successfully completed.
    fn done(&self, name: &PackageName, version: &str, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, name: &PackageName, version: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title)
    }
    fn downloading(&self, name: &PackageName, version: &str, current: u64, total: Option<u64>) {
        (**self).downloading(name, version, current, total)
    }
    fn extracting(&self, name: &PackageName, version: &str) {
        (**self).extracting(name, version)
    }
    fn installing(&self, name: &PackageName, version: &str) {
        (**self).installing(name, version)
    }
    fn removing(&self, name: &PackageName, version: &str) {
        (**self).removing(name, version)
    }
    fn done(&self, name: &PackageName, version: &str, detail: &str) {
        (**self).done(name, version, detail)
    }
    fn failed(&self, name: &PackageName, version: &str, reason: &str) {
        (**self).failed(name, version, reason)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn error(&self, msg: &str) {
        (**self).error(msg)
    }
}

/// A no-op reporter for silent operations (e.g., tests, background refreshes).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &PackageName, _: &str, _: u64, _: Option<u64>) {}
    fn extracting(&self, _: &PackageName, _: &str) {}
    fn installing(&self, _: &PackageName, _: &str) {}
    fn removing(&self, _: &PackageName, _: &str) {}
    fn done(&self, _: &PackageName, _: &str, _: &str) {}
    fn failed(&self, _: &PackageName, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}
