//! Explicit per-pass batch accumulator.
//!
//! A reconciliation pass (startup scan, periodic refresh, forced resync)
//! opens a `BatchScope` before touching any flow manager and closes it once
//! every guest and host-local update of the pass has been applied. The
//! scope records, per bridge, how many owner updates are pending, so each
//! touched manager commits exactly once when the scope closes.

use std::collections::HashMap;

/// Pending update counts per bridge for one reconciliation pass.
#[derive(Debug, Default)]
pub struct BatchScope {
    touched: HashMap<String, usize>,
}

impl BatchScope {
    /// Opens an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one owner update against `bridge`.
    pub fn note(&mut self, bridge: &str) {
        *self.touched.entry(bridge.to_string()).or_insert(0) += 1;
    }

    /// Whether any manager was touched during the pass.
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Consumes the scope, yielding (bridge, pending count) pairs.
    pub fn into_touched(self) -> HashMap<String, usize> {
        self.touched
    }
}
