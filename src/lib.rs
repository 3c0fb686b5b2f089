//! autoclash
//!
//! Latency and cost aware failover for proxy selector groups managed through
//! a Clash-compatible control API.

pub mod error;
pub mod failover;
pub mod models;
