//! Latency Prober
//!
//! Asks the control service to delay-test endpoints. Every failure mode
//! (error status, timeout, undecodable body) collapses into "no signal".

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::models::{Endpoint, NO_SIGNAL};

use super::client::ControlApi;
use super::config::AutoclashConfig;
use super::metrics::ControllerMetrics;

/// Slack on top of the service-side timeout before a probe is abandoned
const PROBE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub test_url: String,
    pub probe_timeout: Duration,
    pub trial_count: u32,
    pub trial_delay: Duration,
    pub concurrency: usize,
}

impl ProbeSettings {
    pub fn from_config(config: &AutoclashConfig) -> Self {
        Self {
            test_url: config.test_url.clone(),
            probe_timeout: config.probe_timeout(),
            trial_count: config.test_times.max(1),
            trial_delay: config.trial_delay(),
            concurrency: config.probe_concurrency.max(1),
        }
    }
}

#[derive(Clone)]
pub struct LatencyProber {
    api: Arc<dyn ControlApi>,
    settings: ProbeSettings,
    metrics: Arc<ControllerMetrics>,
}

impl LatencyProber {
    pub fn new(api: Arc<dyn ControlApi>, settings: ProbeSettings, metrics: Arc<ControllerMetrics>) -> Self {
        Self {
            api,
            settings,
            metrics,
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Single delay test; `None` means no signal
    pub async fn probe(&self, name: &str) -> Option<u32> {
        let call = self
            .api
            .proxy_delay(name, &self.settings.test_url, self.settings.probe_timeout);

        let delay = match timeout(self.settings.probe_timeout + PROBE_GRACE, call).await {
            Ok(Ok(delay)) => Some(delay),
            Ok(Err(e)) => {
                debug!(endpoint = name, error = %e, "delay test failed");
                None
            }
            Err(_) => {
                debug!(endpoint = name, "delay test timed out");
                None
            }
        };
        self.metrics.record_probe(delay.is_some());
        delay
    }

    /// Average of the successful trials, truncated to whole milliseconds
    pub async fn measure(&self, name: &str) -> Option<u32> {
        let trials = self.settings.trial_count;
        let mut total: u64 = 0;
        let mut successes: u64 = 0;

        for trial in 0..trials {
            if let Some(delay) = self.probe(name).await.filter(|d| *d > 0) {
                total += u64::from(delay);
                successes += 1;
            }
            if trial + 1 < trials && !self.settings.trial_delay.is_zero() {
                sleep(self.settings.trial_delay).await;
            }
        }

        if successes == 0 {
            return None;
        }
        u32::try_from(total / successes).ok()
    }

    /// Measure every endpoint concurrently and wait for all of them
    pub async fn measure_all(&self, endpoints: &[Endpoint]) -> Vec<(String, Option<u32>)> {
        // owned futures keep the sweep Send for spawned loops
        let sweeps: Vec<_> = endpoints
            .iter()
            .map(|e| {
                let prober = self.clone();
                let name = e.name.clone();
                async move {
                    let latency = prober.measure(&name).await;
                    debug!(endpoint = %name, latency_ms = latency.map(i64::from).unwrap_or(NO_SIGNAL), "measured");
                    (name, latency)
                }
            })
            .collect();

        stream::iter(sweeps)
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::testing::FakeControlApi;
    use crate::models::ProxiesResponse;

    fn prober(api: Arc<FakeControlApi>, trials: u32) -> LatencyProber {
        let settings = ProbeSettings {
            test_url: "http://probe.test/204".into(),
            probe_timeout: Duration::from_millis(500),
            trial_count: trials,
            trial_delay: Duration::ZERO,
            concurrency: 4,
        };
        LatencyProber::new(api, settings, Arc::new(ControllerMetrics::new()))
    }

    #[tokio::test]
    async fn test_probe_no_signal() {
        let api = Arc::new(FakeControlApi::new(ProxiesResponse::default()));
        api.set_delay("A", Some(120));
        let prober = prober(api.clone(), 1);
        assert_eq!(prober.probe("A").await, Some(120));
        assert_eq!(prober.probe("unknown").await, None);
    }

    #[tokio::test]
    async fn test_measure_averages_successes_only() {
        let api = Arc::new(FakeControlApi::new(ProxiesResponse::default()));
        api.script_delays("A", &[Some(100), None, Some(0), Some(151)]);
        let prober = prober(api.clone(), 4);

        // (100 + 151) / 2, truncated
        assert_eq!(prober.measure("A").await, Some(125));
        assert_eq!(api.delay_calls("A"), 4);
    }

    #[tokio::test]
    async fn test_measure_all_trials_failed() {
        let api = Arc::new(FakeControlApi::new(ProxiesResponse::default()));
        api.script_delays("A", &[None, None, None]);
        let prober = prober(api, 3);
        assert_eq!(prober.measure("A").await, None);
    }

    #[tokio::test]
    async fn test_measure_all_partial_failure() {
        let api = Arc::new(FakeControlApi::new(ProxiesResponse::default()));
        api.set_delay("A", Some(80));
        api.set_delay("B", None);
        api.set_delay("C", Some(40));
        let prober = prober(api, 2);

        let endpoints: Vec<Endpoint> = ["A", "B", "C"].iter().map(|n| Endpoint::new(*n, "Vmess")).collect();
        // sweeps must be usable from spawned loops
        let mut scores = tokio::spawn(async move { prober.measure_all(&endpoints).await })
            .await
            .unwrap();
        scores.sort();
        assert_eq!(
            scores,
            vec![
                ("A".to_string(), Some(80)),
                ("B".to_string(), None),
                ("C".to_string(), Some(40)),
            ]
        );
    }
}
