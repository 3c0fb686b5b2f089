//! Endpoint Snapshot Fetcher
//!
//! Pulls the proxy directory from the control service and reduces it to the
//! filtered, cost-scored set of selectable endpoints.

use std::sync::Arc;

use tracing::debug;

use crate::error::FetchError;
use crate::models::{Endpoint, ProxiesResponse};

use super::client::ControlApi;
use super::config::EndpointFilter;

/// Result of one directory fetch
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Filtered selectable endpoints, sorted by name
    pub endpoints: Vec<Endpoint>,
    /// Member the selector group reported, whether or not it passed filtering
    pub reported_active: Option<String>,
    /// `reported_active` resolved within `endpoints`
    pub active: Option<Endpoint>,
}

/// Reduce a raw `/proxies` response to a snapshot
pub fn build_snapshot(
    response: ProxiesResponse,
    selector_name: &str,
    filter: &EndpointFilter,
) -> Snapshot {
    let mut reported_active = None;
    let mut candidates = Vec::with_capacity(response.proxies.len());

    for (key, entry) in response.proxies {
        let name = if entry.name.is_empty() { key } else { entry.name.clone() };
        if name == selector_name {
            reported_active = entry.now.clone().filter(|n| !n.is_empty());
            continue;
        }
        if entry.is_aggregate() || !entry.alive {
            continue;
        }
        let mut endpoint = Endpoint::new(name, entry.kind);
        endpoint.reachable = entry.alive;
        candidates.push(endpoint);
    }

    let mut endpoints = filter.apply(candidates, |e| e.name.as_str());
    endpoints.sort_by(|a, b| a.name.cmp(&b.name));

    let active = reported_active
        .as_deref()
        .and_then(|name| endpoints.iter().find(|e| e.name == name))
        .cloned();

    Snapshot {
        endpoints,
        reported_active,
        active,
    }
}

/// Periodic source of endpoint snapshots
pub struct SnapshotFetcher {
    api: Arc<dyn ControlApi>,
    selector_name: String,
    filter: EndpointFilter,
}

impl SnapshotFetcher {
    pub fn new(api: Arc<dyn ControlApi>, selector_name: impl Into<String>, filter: EndpointFilter) -> Self {
        Self {
            api,
            selector_name: selector_name.into(),
            filter,
        }
    }

    /// Fetch and reduce the directory. An empty result is an error so the
    /// caller keeps the previous generation.
    pub async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let response = self.api.list_proxies().await?;
        let total = response.proxies.len();
        let snapshot = build_snapshot(response, &self.selector_name, &self.filter);

        debug!(
            total,
            selectable = snapshot.endpoints.len(),
            reported_active = snapshot.reported_active.as_deref(),
            "proxy directory fetched"
        );

        if snapshot.endpoints.is_empty() {
            return Err(FetchError::NoEndpoints);
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::testing::FakeControlApi;
    use crate::models::ProxyEntry;

    fn entry(name: &str, kind: &str, alive: bool, now: Option<&str>) -> (String, ProxyEntry) {
        (
            name.to_string(),
            ProxyEntry {
                name: name.to_string(),
                kind: kind.to_string(),
                alive,
                now: now.map(str::to_string),
            },
        )
    }

    fn directory() -> ProxiesResponse {
        ProxiesResponse {
            proxies: [
                entry("PROXY", "Selector", true, Some("HK 02 1.5x")),
                entry("Auto", "URLTest", true, Some("HK 01")),
                entry("DIRECT", "Direct", true, None),
                entry("REJECT", "Reject", true, None),
                entry("HK 01", "Shadowsocks", true, None),
                entry("HK 02 1.5x", "Vmess", true, None),
                entry("JP 01 (2x)", "Trojan", true, None),
                entry("US 01", "Vmess", false, None),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn test_build_snapshot() {
        let filter = EndpointFilter::default();
        let snapshot = build_snapshot(directory(), "PROXY", &filter);

        let names: Vec<_> = snapshot.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["HK 01", "HK 02 1.5x", "JP 01 (2x)"]);
        assert_eq!(snapshot.reported_active.as_deref(), Some("HK 02 1.5x"));

        let active = snapshot.active.unwrap();
        assert_eq!(active.name, "HK 02 1.5x");
        assert_eq!(active.cost, 1.5);
        assert_eq!(active.latency, None);
        assert_eq!(snapshot.endpoints[2].cost, 2.0);
    }

    #[test]
    fn test_active_unresolved_when_filtered_out() {
        let filter = EndpointFilter::new("", "HK").unwrap();
        let snapshot = build_snapshot(directory(), "PROXY", &filter);
        assert_eq!(snapshot.endpoints.len(), 1);
        assert_eq!(snapshot.reported_active.as_deref(), Some("HK 02 1.5x"));
        assert!(snapshot.active.is_none());
    }

    #[test]
    fn test_selector_never_selectable() {
        // selector entry of a non-aggregate kind is still excluded
        let mut response = directory();
        response.proxies.extend([entry("Main", "Shadowsocks", true, Some("HK 01"))]);
        let snapshot = build_snapshot(response, "Main", &EndpointFilter::default());
        assert!(snapshot.endpoints.iter().all(|e| e.name != "Main"));
        assert_eq!(snapshot.active.unwrap().name, "HK 01");
    }

    #[tokio::test]
    async fn test_fetch_empty_pool_is_error() {
        let api = Arc::new(FakeControlApi::new(directory()));
        let filter = EndpointFilter::new("nothing-matches", "").unwrap();
        let fetcher = SnapshotFetcher::new(api, "PROXY", filter);
        assert!(matches!(fetcher.fetch().await, Err(FetchError::NoEndpoints)));
    }

    #[tokio::test]
    async fn test_fetch_transport_error() {
        let api = Arc::new(FakeControlApi::new(directory()));
        api.fail_listing(true);
        let fetcher = SnapshotFetcher::new(api, "PROXY", EndpointFilter::default());
        assert!(matches!(fetcher.fetch().await, Err(FetchError::Api(_))));
    }
}
