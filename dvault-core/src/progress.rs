//! Optional observer notified while a workdir operation runs

/// Callbacks for long-running workdir operations. All methods default to no-ops.
pub trait ProgressObserver: Send {
    /// Called once per file processed by `operation` ("checkin", "checkout").
    fn on_file(&self, _operation: &str, _path: &str, _done: usize, _total: usize) {}

    /// Called when `operation` finished successfully.
    fn on_complete(&self, _operation: &str) {}
}
