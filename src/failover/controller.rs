//! Failover Controller
//!
//! Health-checks the active endpoint and, when it degrades, points the
//! selector group at the preferred endpoint.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::models::{Endpoint, NO_SIGNAL};

use super::client::ControlApi;
use super::metrics::ControllerMetrics;
use super::prober::LatencyProber;
use super::selector::EndpointSelector;
use super::state::PoolState;

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// Active endpoint answered within the escalation bound
    Healthy { endpoint: String, latency_ms: u32 },
    /// Selector group switched to a new member
    Switched {
        from: Option<String>,
        to: String,
        latency_ms: i64,
    },
    /// Degraded and no switch happened this tick
    Degraded { reason: String },
}

pub struct FailoverController {
    pool: Arc<PoolState>,
    api: Arc<dyn ControlApi>,
    prober: LatencyProber,
    selector: EndpointSelector,
    selector_name: String,
    metrics: Arc<ControllerMetrics>,
}

impl FailoverController {
    pub fn new(
        pool: Arc<PoolState>,
        api: Arc<dyn ControlApi>,
        prober: LatencyProber,
        selector: EndpointSelector,
        selector_name: impl Into<String>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            pool,
            api,
            prober,
            selector,
            selector_name: selector_name.into(),
            metrics,
        }
    }

    /// Latency above which the active endpoint counts as degraded
    pub fn degraded_above_ms(&self) -> u64 {
        u64::from(self.selector.base_threshold()) * 2
    }

    /// Probe the active endpoint and fail over if it degraded
    pub async fn check(&self) -> HealthStatus {
        let view = self.pool.view();
        let active = view.active.clone();

        let delay = match &active {
            Some(endpoint) => self.prober.probe(&endpoint.name).await,
            None => None,
        };

        if let (Some(endpoint), Some(latency_ms)) = (&active, delay) {
            if u64::from(latency_ms) <= self.degraded_above_ms() {
                debug!(endpoint = %endpoint.name, latency_ms, "active endpoint healthy");
                return HealthStatus::Healthy {
                    endpoint: endpoint.name.clone(),
                    latency_ms,
                };
            }
        }

        let active_name = active.as_ref().map(|e| e.name.clone());
        warn!(
            endpoint = active_name.as_deref().unwrap_or("<unresolved>"),
            latency_ms = delay.map(i64::from).unwrap_or(NO_SIGNAL),
            limit_ms = self.degraded_above_ms(),
            "active endpoint degraded"
        );

        // a cached preference equal to the failing endpoint is useless
        let cached = view
            .preferred
            .filter(|p| Some(p.name.as_str()) != active_name.as_deref());
        let preferred = match cached {
            Some(preferred) => preferred,
            None => {
                info!("no usable preferred endpoint, selecting now");
                match self.selector.run().await {
                    Ok(preferred) => preferred,
                    Err(e) => {
                        return HealthStatus::Degraded {
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };

        match self.switch_to(&preferred).await {
            Ok(()) => HealthStatus::Switched {
                from: active_name,
                to: preferred.name.clone(),
                latency_ms: preferred.latency_ms(),
            },
            Err(e) => HealthStatus::Degraded {
                reason: format!("switch to {} failed: {}", preferred.name, e),
            },
        }
    }

    async fn switch_to(&self, target: &Endpoint) -> Result<(), ApiError> {
        let result = self.api.switch_proxy(&self.selector_name, &target.name).await;
        self.metrics.record_switch(result.is_ok());
        match &result {
            Ok(()) => {
                self.pool.set_active(&target.name);
                info!(
                    selector = %self.selector_name,
                    endpoint = %target.name,
                    latency_ms = target.latency_ms(),
                    cost = target.cost,
                    "switched endpoint"
                );
            }
            Err(e) => {
                warn!(selector = %self.selector_name, endpoint = %target.name, error = %e, "switch failed");
            }
        }
        result
    }
}
