//! Shared Pool State
//!
//! Single owner of the endpoint list and the active/preferred selections.
//! Every task goes through these operations; the whole record sits behind one
//! lock so a snapshot replacement can never interleave with a decision that
//! reads and then writes it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::models::Endpoint;

/// Weak, by-name reference into one generation of the endpoint list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRef {
    pub name: String,
    pub generation: u64,
}

#[derive(Debug)]
struct PoolInner {
    generation: u64,
    endpoints: Arc<[Endpoint]>,
    fetched_at: Option<DateTime<Utc>>,
    active: Option<EndpointRef>,
    preferred: Option<EndpointRef>,
}

impl Default for PoolInner {
    fn default() -> Self {
        Self {
            generation: 0,
            endpoints: Arc::from(Vec::new()),
            fetched_at: None,
            active: None,
            preferred: None,
        }
    }
}

impl PoolInner {
    fn find(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    fn resolve(&self, r: Option<&EndpointRef>) -> Option<Endpoint> {
        let r = r?;
        if r.generation != self.generation {
            return None;
        }
        self.find(&r.name).cloned()
    }
}

/// Consistent read of the pool at one instant
#[derive(Debug, Clone)]
pub struct PoolView {
    pub generation: u64,
    pub endpoints: Arc<[Endpoint]>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub active: Option<Endpoint>,
    pub preferred: Option<Endpoint>,
}

impl PoolView {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|e| e.name.as_str())
    }
}

/// Process-wide pool state
#[derive(Debug, Default)]
pub struct PoolState {
    inner: Mutex<PoolInner>,
}

impl PoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new generation.
    ///
    /// Active follows the service's report and stays unresolved when the
    /// reported member did not survive filtering. Without a report the
    /// previous active name is kept if it is still in the list. Preferred is
    /// not carried over.
    pub fn replace_snapshot(&self, endpoints: Vec<Endpoint>, reported_active: Option<&str>) -> u64 {
        let mut inner = self.inner.lock();
        let previous_active = inner.active.take().map(|r| r.name);

        inner.generation += 1;
        inner.endpoints = endpoints.into();
        inner.fetched_at = Some(Utc::now());

        let generation = inner.generation;
        // a report the new list cannot resolve leaves active unresolved
        let active = match reported_active {
            Some(name) => Some(name.to_string()),
            None => previous_active,
        }
        .filter(|name| inner.find(name).is_some());
        inner.active = active.map(|name| EndpointRef { name, generation });

        debug!(
            generation,
            endpoints = inner.endpoints.len(),
            active = inner.active.as_ref().map(|r| r.name.as_str()),
            "pool snapshot replaced"
        );
        generation
    }

    pub fn view(&self) -> PoolView {
        let inner = self.inner.lock();
        PoolView {
            generation: inner.generation,
            endpoints: inner.endpoints.clone(),
            fetched_at: inner.fetched_at,
            active: inner.resolve(inner.active.as_ref()),
            preferred: inner.resolve(inner.preferred.as_ref()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Store a preference computed against `generation`. Rejected when the
    /// pool moved on or the endpoint is not part of the current list.
    pub fn set_preferred(&self, generation: u64, endpoint: &Endpoint) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.find(&endpoint.name).is_none() {
            return false;
        }
        inner.preferred = Some(EndpointRef {
            name: endpoint.name.clone(),
            generation,
        });
        true
    }

    /// Write measured latencies back into `generation`
    pub fn record_latencies(&self, generation: u64, scores: &[(String, Option<u32>)]) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        let updated: Vec<Endpoint> = inner
            .endpoints
            .iter()
            .map(|e| {
                let latency = scores
                    .iter()
                    .find(|(name, _)| *name == e.name)
                    .map_or(e.latency, |(_, latency)| *latency);
                e.clone().with_latency(latency)
            })
            .collect();
        inner.endpoints = updated.into();
        true
    }

    /// Record the member the service switched to
    pub fn set_active(&self, name: &str) {
        let mut inner = self.inner.lock();
        let generation = inner.generation;
        inner.active = Some(EndpointRef {
            name: name.to_string(),
            generation,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(names: &[&str]) -> Vec<Endpoint> {
        names.iter().map(|n| Endpoint::new(*n, "Shadowsocks")).collect()
    }

    #[test]
    fn test_starts_empty() {
        let pool = PoolState::new();
        let view = pool.view();
        assert_eq!(view.generation, 0);
        assert!(view.is_empty());
        assert!(view.active.is_none());
        assert!(view.fetched_at.is_none());
    }

    #[test]
    fn test_reported_active_resolved() {
        let pool = PoolState::new();
        let generation = pool.replace_snapshot(endpoints(&["A", "B"]), Some("B"));
        let view = pool.view();
        assert_eq!(generation, 1);
        assert_eq!(view.active_name(), Some("B"));
    }

    #[test]
    fn test_active_identity_survives_replacement() {
        let pool = PoolState::new();
        let g1 = pool.replace_snapshot(endpoints(&["A", "B"]), Some("A"));
        pool.record_latencies(g1, &[("A".into(), Some(80))]);
        assert_eq!(pool.view().active.unwrap().latency, Some(80));

        // service report not usable this cycle, A still listed
        pool.replace_snapshot(endpoints(&["A", "C"]), None);
        let view = pool.view();
        let active = view.active.unwrap();
        assert_eq!(active.name, "A");
        assert_eq!(active.latency, None);
    }

    #[test]
    fn test_active_dropped_when_gone() {
        let pool = PoolState::new();
        pool.replace_snapshot(endpoints(&["A", "B"]), Some("A"));
        pool.replace_snapshot(endpoints(&["B"]), Some("A"));
        assert!(pool.view().active.is_none());
    }

    #[test]
    fn test_unresolvable_report_clears_active() {
        let pool = PoolState::new();
        pool.replace_snapshot(endpoints(&["A", "B"]), Some("A"));

        // group moved to a member the filter dropped
        pool.replace_snapshot(endpoints(&["A", "B"]), Some("X"));
        assert!(pool.view().active.is_none());
    }

    #[test]
    fn test_preferred_goes_stale() {
        let pool = PoolState::new();
        let g1 = pool.replace_snapshot(endpoints(&["A", "B"]), Some("A"));
        let b = pool.view().endpoints[1].clone();
        assert!(pool.set_preferred(g1, &b));
        assert_eq!(pool.view().preferred.unwrap().name, "B");

        pool.replace_snapshot(endpoints(&["A", "B"]), Some("A"));
        assert!(pool.view().preferred.is_none());
        // a late commit from the old batch is refused
        assert!(!pool.set_preferred(g1, &b));
    }

    #[test]
    fn test_stale_latencies_rejected() {
        let pool = PoolState::new();
        let g1 = pool.replace_snapshot(endpoints(&["A"]), None);
        pool.replace_snapshot(endpoints(&["A"]), None);
        assert!(!pool.record_latencies(g1, &[("A".into(), Some(10))]));
        assert_eq!(pool.view().endpoints[0].latency, None);
    }

    #[test]
    fn test_set_active_after_switch() {
        let pool = PoolState::new();
        pool.replace_snapshot(endpoints(&["A", "B"]), Some("A"));
        pool.set_active("B");
        assert_eq!(pool.view().active_name(), Some("B"));
    }
}
