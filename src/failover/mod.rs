//! Proxy Failover Controller
//!
//! Keeps a Clash-compatible selector group pointed at a healthy, fast and
//! cheap member.
//!
//! Features:
//! - Periodic endpoint directory refresh with include/exclude filtering
//! - Cost coefficients parsed from endpoint names (`1.5x`, `(2x)`)
//! - Concurrent latency sweeps averaged over several trials
//! - Cost-tiered selection with threshold escalation
//! - Health checks of the active member with automatic switch-over
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autoclash::failover::{AutoclashConfig, FailoverRunner, HttpControlApi};
//!
//! let config = AutoclashConfig::load("config.toml")?;
//! let api = Arc::new(HttpControlApi::from_config(&config)?);
//! let handles = FailoverRunner::from_config(&config, api)?.spawn();
//! ```

pub mod client;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod prober;
pub mod runner;
pub mod selector;
pub mod snapshot;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use client::*;
pub use config::*;
pub use controller::*;
pub use metrics::*;
pub use prober::*;
pub use runner::*;
pub use selector::*;
pub use snapshot::*;
pub use state::*;
