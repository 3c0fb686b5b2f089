//! Endpoint Selector
//!
//! Cost-tiered latency search. Tiers are visited cheapest first and the first
//! tier holding an endpoint under the current threshold wins, so a cheaper
//! endpoint is always preferred over a faster one in a more expensive tier.
//! When no tier qualifies the threshold is relaxed by a tenth of the base, up
//! to twice the base.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::SelectError;
use crate::models::Endpoint;

use super::metrics::ControllerMetrics;
use super::prober::LatencyProber;
use super::state::PoolState;

/// Endpoints sharing one cost coefficient
#[derive(Debug, Clone)]
pub struct CostTier<'a> {
    pub cost: f64,
    pub endpoints: Vec<&'a Endpoint>,
}

impl<'a> CostTier<'a> {
    /// Lowest measured latency within `threshold`; first one wins ties
    fn best_within(&self, threshold: u64) -> Option<&'a Endpoint> {
        let mut best: Option<&'a Endpoint> = None;
        for endpoint in &self.endpoints {
            let Some(latency) = endpoint.latency.filter(|l| *l > 0) else {
                continue;
            };
            if u64::from(latency) > threshold {
                continue;
            }
            if best.map_or(true, |b| b.latency.map_or(true, |bl| latency < bl)) {
                best = Some(*endpoint);
            }
        }
        best
    }
}

/// Group endpoints by cost coefficient, cheapest tier first
pub fn group_by_cost(endpoints: &[Endpoint]) -> Vec<CostTier<'_>> {
    let mut sorted: Vec<&Endpoint> = endpoints.iter().collect();
    // stable: keeps the incoming order inside a tier
    sorted.sort_by(|a, b| a.cost.total_cmp(&b.cost));

    let mut tiers: Vec<CostTier<'_>> = Vec::new();
    for endpoint in sorted {
        match tiers.last_mut() {
            Some(tier) if tier.cost == endpoint.cost => tier.endpoints.push(endpoint),
            _ => tiers.push(CostTier {
                cost: endpoint.cost,
                endpoints: vec![endpoint],
            }),
        }
    }
    tiers
}

/// One move of the search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchStep<'a> {
    Found(&'a Endpoint),
    /// Current tier had nothing under the threshold
    NextTier,
    /// Every tier failed; threshold raised to the carried value
    Escalated(u64),
    /// Threshold went past twice the base
    Exhausted,
}

/// Threshold escalation state machine over a fixed set of tiers
#[derive(Debug)]
pub struct ThresholdSearch<'a> {
    tiers: Vec<CostTier<'a>>,
    step: u64,
    ceiling: u64,
    threshold: u64,
    tier: usize,
    escalations: u32,
    exhausted: bool,
}

impl<'a> ThresholdSearch<'a> {
    pub fn new(endpoints: &'a [Endpoint], base_threshold: u32) -> Self {
        let base = u64::from(base_threshold);
        Self {
            tiers: group_by_cost(endpoints),
            // base / 10, but never zero so the loop always terminates
            step: (base / 10).max(1),
            ceiling: base * 2,
            threshold: base,
            tier: 0,
            escalations: 0,
            exhausted: false,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn tier(&self) -> usize {
        self.tier
    }

    pub fn escalations(&self) -> u32 {
        self.escalations
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn advance(&mut self) -> SearchStep<'a> {
        if self.exhausted || self.threshold > self.ceiling {
            self.exhausted = true;
            return SearchStep::Exhausted;
        }

        if let Some(tier) = self.tiers.get(self.tier) {
            if let Some(found) = tier.best_within(self.threshold) {
                return SearchStep::Found(found);
            }
            self.tier += 1;
            return SearchStep::NextTier;
        }

        self.tier = 0;
        self.threshold += self.step;
        self.escalations += 1;
        if self.threshold > self.ceiling {
            self.exhausted = true;
            return SearchStep::Exhausted;
        }
        SearchStep::Escalated(self.threshold)
    }

    /// Drive the search to completion
    pub fn run(&mut self) -> Option<&'a Endpoint> {
        loop {
            match self.advance() {
                SearchStep::Found(endpoint) => return Some(endpoint),
                SearchStep::NextTier => {}
                SearchStep::Escalated(threshold) => {
                    debug!(threshold_ms = threshold, "no endpoint under threshold, escalating");
                }
                SearchStep::Exhausted => return None,
            }
        }
    }
}

/// Pick the preferred endpoint from already measured endpoints
pub fn select_preferred(endpoints: &[Endpoint], base_threshold: u32) -> Result<Endpoint, SelectError> {
    if endpoints.is_empty() {
        return Err(SelectError::NoEndpoints);
    }
    let mut search = ThresholdSearch::new(endpoints, base_threshold);
    search.run().cloned().ok_or(SelectError::NoSuitableEndpoint {
        ceiling_ms: u32::try_from(search.ceiling()).unwrap_or(u32::MAX),
    })
}

/// Measures the pool and records the preferred endpoint
#[derive(Clone)]
pub struct EndpointSelector {
    pool: Arc<PoolState>,
    prober: LatencyProber,
    base_threshold: u32,
    metrics: Arc<ControllerMetrics>,
}

impl EndpointSelector {
    pub fn new(
        pool: Arc<PoolState>,
        prober: LatencyProber,
        base_threshold: u32,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            pool,
            prober,
            base_threshold,
            metrics,
        }
    }

    pub fn base_threshold(&self) -> u32 {
        self.base_threshold
    }

    /// Sweep the current generation and pick the preferred endpoint.
    ///
    /// The sweep runs without the pool lock. If the pool is replaced
    /// meanwhile, the result is still returned but not stored.
    pub async fn run(&self) -> Result<Endpoint, SelectError> {
        let view = self.pool.view();
        if view.is_empty() {
            self.metrics.record_selection(false);
            return Err(SelectError::NoEndpoints);
        }

        let scores = self.prober.measure_all(&view.endpoints).await;
        if !self.pool.record_latencies(view.generation, &scores) {
            debug!(generation = view.generation, "pool replaced during sweep, latencies discarded");
        }

        let scored: Vec<Endpoint> = view
            .endpoints
            .iter()
            .map(|e| {
                let latency = scores
                    .iter()
                    .find(|(name, _)| *name == e.name)
                    .and_then(|(_, latency)| *latency);
                e.clone().with_latency(latency)
            })
            .collect();

        let result = select_preferred(&scored, self.base_threshold);
        self.metrics.record_selection(result.is_ok());

        match &result {
            Ok(preferred) => {
                let stored = self.pool.set_preferred(view.generation, preferred);
                info!(
                    endpoint = %preferred.name,
                    latency_ms = preferred.latency_ms(),
                    cost = preferred.cost,
                    stored,
                    "preferred endpoint selected"
                );
            }
            Err(e) => {
                let reachable = scored.iter().filter(|e| e.latency.is_some()).count();
                warn!(error = %e, reachable, total = scored.len(), "endpoint selection failed");
            }
        }
        result
    }
}
