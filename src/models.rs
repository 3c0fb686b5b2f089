use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Entry kinds that aggregate or terminate traffic rather than proxy it
pub const AGGREGATE_KINDS: [&str; 6] = [
    "Selector",
    "Direct",
    "URLTest",
    "Fallback",
    "LoadBalance",
    "Reject",
];

/// Log value for "unmeasured or unreachable"
pub const NO_SIGNAL: i64 = -1;

lazy_static! {
    static ref COST_TOKEN: Regex = Regex::new(r"(\d+\.\d+)x|(\d+)x").expect("static regex");
}

/// One entry of `GET /proxies`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyEntry {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub alive: bool,
    /// Only set on aggregate entries
    #[serde(default)]
    pub now: Option<String>,
}

impl ProxyEntry {
    pub fn is_aggregate(&self) -> bool {
        AGGREGATE_KINDS.contains(&self.kind.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxiesResponse {
    #[serde(default)]
    pub proxies: HashMap<String, ProxyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayResponse {
    pub delay: u32,
}

/// Body of `PUT /proxies/{group}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub name: String,
}

/// A selectable proxy endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub kind: String,
    pub reachable: bool,
    pub cost: f64,
    /// Milliseconds; `None` until measured or when the last measurement failed
    pub latency: Option<u32>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        let cost = parse_cost_coefficient(&name);
        Self {
            name,
            kind: kind.into(),
            reachable: true,
            cost,
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Option<u32>) -> Self {
        self.latency = latency;
        self
    }

    /// Latency with `-1` standing in for no signal
    pub fn latency_ms(&self) -> i64 {
        self.latency.map(i64::from).unwrap_or(NO_SIGNAL)
    }
}

/// Cost coefficient embedded in an endpoint name, e.g. `HK 01 (1.5x)`.
///
/// Falls back to `1.0` when the name carries no `<number>x` token or the
/// number is not a usable positive value.
pub fn parse_cost_coefficient(name: &str) -> f64 {
    let Some(caps) = COST_TOKEN.captures(name) else {
        return 1.0;
    };
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_coefficient() {
        assert_eq!(parse_cost_coefficient("Tokyo 01"), 1.0);
        assert_eq!(parse_cost_coefficient("HK 1.5x"), 1.5);
        assert_eq!(parse_cost_coefficient("SG (2x)"), 2.0);
        assert_eq!(parse_cost_coefficient("US 0.5x IPLC"), 0.5);
        assert_eq!(parse_cost_coefficient("JP 10x premium"), 10.0);
        // zero would break the "always positive" invariant
        assert_eq!(parse_cost_coefficient("Free 0x"), 1.0);
        assert_eq!(parse_cost_coefficient(""), 1.0);
        assert_eq!(parse_cost_coefficient("xray"), 1.0);
    }

    #[test]
    fn test_first_token_wins() {
        assert_eq!(parse_cost_coefficient("2x relay 3x"), 2.0);
    }

    #[test]
    fn test_proxy_entry_decode() {
        let raw = r#"{
            "proxies": {
                "GLOBAL": {"name": "GLOBAL", "type": "Selector", "now": "HK 01", "alive": true},
                "HK 01": {"name": "HK 01", "type": "Shadowsocks", "alive": true, "history": []},
                "DIRECT": {"name": "DIRECT", "type": "Direct"}
            }
        }"#;
        let resp: ProxiesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.proxies.len(), 3);
        assert!(resp.proxies["GLOBAL"].is_aggregate());
        assert_eq!(resp.proxies["GLOBAL"].now.as_deref(), Some("HK 01"));
        assert!(!resp.proxies["HK 01"].is_aggregate());
        assert!(!resp.proxies["DIRECT"].alive);
    }

    #[test]
    fn test_latency_sentinel() {
        let ep = Endpoint::new("A", "Vmess");
        assert_eq!(ep.latency_ms(), NO_SIGNAL);
        assert_eq!(ep.with_latency(Some(42)).latency_ms(), 42);
    }
}
