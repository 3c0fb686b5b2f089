//! Periodic tasks
//!
//! Three independent loops share one `PoolState`: snapshot refresh, preferred
//! endpoint recompute and the active endpoint health check. None of them can
//! stop the process; failures are logged and retried on their own schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, FetchError};

use super::client::ControlApi;
use super::config::AutoclashConfig;
use super::controller::{FailoverController, HealthStatus};
use super::metrics::ControllerMetrics;
use super::prober::{LatencyProber, ProbeSettings};
use super::selector::EndpointSelector;
use super::snapshot::SnapshotFetcher;
use super::state::PoolState;

/// Fixed-period schedule of the three loops
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub refresh: Duration,
    pub select: Duration,
    pub check: Duration,
    pub retry_backoff: Duration,
}

impl Schedule {
    pub fn from_config(config: &AutoclashConfig) -> Self {
        Self {
            refresh: config.retrieve_interval(),
            select: config.best_interval(),
            check: config.current_interval(),
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Join handles of the spawned loops
pub struct RunnerHandles {
    pub snapshot: JoinHandle<()>,
    pub selector: JoinHandle<()>,
    pub failover: JoinHandle<()>,
}

impl RunnerHandles {
    pub fn abort(&self) {
        self.snapshot.abort();
        self.selector.abort();
        self.failover.abort();
    }
}

/// Owns every component and spawns the loops
pub struct FailoverRunner {
    pool: Arc<PoolState>,
    metrics: Arc<ControllerMetrics>,
    fetcher: Arc<SnapshotFetcher>,
    selector: EndpointSelector,
    controller: Arc<FailoverController>,
    schedule: Schedule,
}

impl FailoverRunner {
    pub fn from_config(config: &AutoclashConfig, api: Arc<dyn ControlApi>) -> Result<Self, ConfigError> {
        let filter = config.endpoint_filter()?;
        let pool = Arc::new(PoolState::new());
        let metrics = Arc::new(ControllerMetrics::new());

        let fetcher = Arc::new(SnapshotFetcher::new(api.clone(), config.select_node.clone(), filter));
        let prober = LatencyProber::new(api.clone(), ProbeSettings::from_config(config), metrics.clone());
        let selector = EndpointSelector::new(
            pool.clone(),
            prober.clone(),
            config.latency_threshold,
            metrics.clone(),
        );
        let controller = Arc::new(FailoverController::new(
            pool.clone(),
            api,
            prober,
            selector.clone(),
            config.select_node.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            pool,
            metrics,
            fetcher,
            selector,
            controller,
            schedule: Schedule::from_config(config),
        })
    }

    pub fn pool(&self) -> Arc<PoolState> {
        self.pool.clone()
    }

    pub fn metrics(&self) -> Arc<ControllerMetrics> {
        self.metrics.clone()
    }

    /// One refresh, one selection and one health check, in that order
    pub async fn run_once(&self) -> Result<HealthStatus, FetchError> {
        refresh_snapshot(&self.fetcher, &self.pool, &self.metrics).await?;
        if let Err(e) = self.selector.run().await {
            warn!(error = %e, "selection failed");
        }
        let status = self.controller.check().await;
        log_status(&status);
        Ok(status)
    }

    pub fn spawn(self) -> RunnerHandles {
        let schedule = self.schedule;
        info!(
            refresh_secs = schedule.refresh.as_secs(),
            select_secs = schedule.select.as_secs(),
            check_secs = schedule.check.as_secs(),
            "starting failover loops"
        );

        let snapshot = tokio::spawn(snapshot_loop(
            self.fetcher.clone(),
            self.pool.clone(),
            self.metrics.clone(),
            schedule,
        ));
        let selector = tokio::spawn(selector_loop(
            self.selector.clone(),
            self.pool.clone(),
            self.metrics.clone(),
            schedule,
        ));
        let failover = tokio::spawn(failover_loop(self.controller.clone(), self.pool.clone(), schedule));

        RunnerHandles {
            snapshot,
            selector,
            failover,
        }
    }
}

async fn refresh_snapshot(
    fetcher: &SnapshotFetcher,
    pool: &PoolState,
    metrics: &ControllerMetrics,
) -> Result<u64, FetchError> {
    match fetcher.fetch().await {
        Ok(snapshot) => {
            let generation = pool.replace_snapshot(snapshot.endpoints, snapshot.reported_active.as_deref());
            metrics.record_snapshot(true);
            let view = pool.view();
            info!(
                generation,
                endpoints = view.endpoints.len(),
                active = view.active_name().unwrap_or("<unresolved>"),
                reported = snapshot.reported_active.as_deref().unwrap_or("<none>"),
                fetched_at = %view.fetched_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                "endpoint list refreshed"
            );
            Ok(generation)
        }
        Err(e) => {
            metrics.record_snapshot(false);
            Err(e)
        }
    }
}

async fn snapshot_loop(
    fetcher: Arc<SnapshotFetcher>,
    pool: Arc<PoolState>,
    metrics: Arc<ControllerMetrics>,
    schedule: Schedule,
) {
    let mut ticker = interval(schedule.refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let mut retried = false;
        while let Err(e) = refresh_snapshot(&fetcher, &pool, &metrics).await {
            warn!(
                error = %e,
                retry_in_secs = schedule.retry_backoff.as_secs(),
                "endpoint list refresh failed, keeping previous list"
            );
            retried = true;
            sleep(schedule.retry_backoff).await;
        }
        if retried {
            ticker.reset();
        }
    }
}

async fn selector_loop(
    selector: EndpointSelector,
    pool: Arc<PoolState>,
    metrics: Arc<ControllerMetrics>,
    schedule: Schedule,
) {
    let mut ticker = interval(schedule.select);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let mut retried = false;
        loop {
            if pool.view().is_empty() {
                debug!("endpoint list not loaded yet, selection postponed");
            } else if selector.run().await.is_ok() {
                break;
            }
            retried = true;
            sleep(schedule.retry_backoff).await;
        }
        if retried {
            ticker.reset();
        }

        let m = metrics.snapshot();
        info!(
            snapshots = m.snapshots,
            snapshot_failures = m.snapshot_failures,
            probes = m.probes,
            probe_success_rate = m.probe_success_rate(),
            selections = m.selections,
            switches = m.switches,
            switch_failures = m.switch_failures,
            "controller counters"
        );
    }
}

async fn failover_loop(controller: Arc<FailoverController>, pool: Arc<PoolState>, schedule: Schedule) {
    let mut ticker = interval(schedule.check);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first check after one full period
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if pool.view().is_empty() {
            debug!("endpoint list not loaded yet, health check skipped");
            continue;
        }
        let status = controller.check().await;
        log_status(&status);
    }
}

fn log_status(status: &HealthStatus) {
    match status {
        HealthStatus::Healthy { endpoint, latency_ms } => {
            debug!(endpoint = %endpoint, latency_ms, "health check passed");
        }
        HealthStatus::Switched { from, to, latency_ms } => {
            info!(
                from = from.as_deref().unwrap_or("<unresolved>"),
                to = %to,
                latency_ms,
                "failover completed"
            );
        }
        HealthStatus::Degraded { reason } => {
            warn!(reason = %reason, "active endpoint degraded, retrying next tick");
        }
    }
}
