//! Zero-downtime drain for rolling deployments.
//!
//! `DrainState` is the process-wide phase read by health checks and the
//! upgrade path. `DrainController` runs the sequence:
//! 1. Flip to `draining` so new upgrades and readiness probes are refused
//! 2. Queue a `reconnect` event for every client
//! 3. Wait, bounded by the drain timeout, for clients to disconnect
//! 4. Force-close the rest and flip to `closed`

mod controller;
mod state;

pub use controller::{DrainConfig, DrainController, DrainResult};
pub use state::{DrainPhase, DrainState};
