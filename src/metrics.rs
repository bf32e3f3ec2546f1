use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for observability
///
/// Counters are updated by the manager as it processes connection
/// notifications. Use `snapshot()` for a point-in-time view, or the
/// individual getters for specific values.
///
/// # Example
/// ```ignore
/// let metrics = manager.metrics();
///
/// println!("Connects: {}", metrics.connections());
/// println!("Orphans: {}", metrics.orphaned());
///
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    connections_total: AtomicU64,
    disconnections_total: AtomicU64,
    orphan_disconnections_total: AtomicU64,
    errors_total: AtomicU64,
    patches_total: AtomicU64,
    orphaned_total: AtomicU64,
    releases_total: AtomicU64,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    /// Get total successful connects on active connections
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total disconnects of active connections
    pub fn disconnections(&self) -> u64 {
        self.disconnections_total.load(Ordering::Relaxed)
    }

    /// Get total disconnects of orphaned connections
    pub fn orphan_disconnections(&self) -> u64 {
        self.orphan_disconnections_total.load(Ordering::Relaxed)
    }

    /// Get total errors re-broadcast
    pub fn errors(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Get total patch operations
    pub fn patches(&self) -> u64 {
        self.patches_total.load(Ordering::Relaxed)
    }

    /// Get total connections moved to the orphan set
    pub fn orphaned(&self) -> u64 {
        self.orphaned_total.load(Ordering::Relaxed)
    }

    /// Get total released slots
    pub fn releases(&self) -> u64 {
        self.releases_total.load(Ordering::Relaxed)
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnection(&self) {
        self.disconnections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_orphan_disconnection(&self) {
        self.orphan_disconnections_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_patch(&self) {
        self.patches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_orphaned(&self) {
        self.orphaned_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot of all counters for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Acquire),
            disconnections_total: self.disconnections_total.load(Ordering::Acquire),
            orphan_disconnections_total: self.orphan_disconnections_total.load(Ordering::Acquire),
            errors_total: self.errors_total.load(Ordering::Acquire),
            patches_total: self.patches_total.load(Ordering::Acquire),
            orphaned_total: self.orphaned_total.load(Ordering::Acquire),
            releases_total: self.releases_total.load(Ordering::Acquire),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub disconnections_total: u64,
    pub orphan_disconnections_total: u64,
    pub errors_total: u64,
    pub patches_total: u64,
    pub orphaned_total: u64,
    pub releases_total: u64,
}
