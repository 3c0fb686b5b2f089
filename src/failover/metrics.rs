//! Controller counters
//!
//! Lock-free tallies of what the three loops did. There is no export
//! endpoint; the selector loop logs a snapshot after every sweep.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ControllerMetrics {
    snapshots: AtomicU64,
    snapshot_failures: AtomicU64,
    probes: AtomicU64,
    probe_failures: AtomicU64,
    selections: AtomicU64,
    selection_failures: AtomicU64,
    switches: AtomicU64,
    switch_failures: AtomicU64,
}

/// Plain copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub snapshots: u64,
    pub snapshot_failures: u64,
    pub probes: u64,
    pub probe_failures: u64,
    pub selections: u64,
    pub selection_failures: u64,
    pub switches: u64,
    pub switch_failures: u64,
}

impl MetricsSnapshot {
    /// Share of probes that produced a signal, 0-1
    pub fn probe_success_rate(&self) -> f64 {
        if self.probes == 0 {
            return 0.0;
        }
        (self.probes - self.probe_failures) as f64 / self.probes as f64
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_snapshot(&self, ok: bool) {
        bump(&self.snapshots);
        if !ok {
            bump(&self.snapshot_failures);
        }
    }

    pub fn record_probe(&self, ok: bool) {
        bump(&self.probes);
        if !ok {
            bump(&self.probe_failures);
        }
    }

    pub fn record_selection(&self, ok: bool) {
        bump(&self.selections);
        if !ok {
            bump(&self.selection_failures);
        }
    }

    pub fn record_switch(&self, ok: bool) {
        bump(&self.switches);
        if !ok {
            bump(&self.switch_failures);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            snapshots: self.snapshots.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            selections: self.selections.load(Ordering::Relaxed),
            selection_failures: self.selection_failures.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            switch_failures: self.switch_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ControllerMetrics::new();
        metrics.record_probe(true);
        metrics.record_probe(true);
        metrics.record_probe(false);
        metrics.record_probe(true);
        metrics.record_switch(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.probes, 4);
        assert_eq!(snap.probe_failures, 1);
        assert_eq!(snap.switches, 1);
        assert_eq!(snap.switch_failures, 1);
        assert_eq!(snap.probe_success_rate(), 0.75);
        assert_eq!(MetricsSnapshot::default().probe_success_rate(), 0.0);
    }
}
