//! # wick-agent
//!
//! The device side of the fleet: a resilient outbound session to the hub
//! (auto-reconnect, heartbeat, in-order command dispatch), the controller
//! applying commands to the effect worker, and the two background loops —
//! the reconciler reporting actually-running state back to the hub and
//! the inactivity watchdog resetting to defaults after a quiet period.

#![deny(unsafe_code)]

pub mod agent;
pub mod config;
pub mod controller;
pub mod reconciler;
pub mod watchdog;
pub mod worker;

pub use agent::{AgentError, ClientAgent, CommandHandler, ConnectionState, StatusSender};
pub use config::AgentConfig;
pub use controller::CandleController;
pub use reconciler::start_reconciler;
pub use watchdog::start_watchdog;
pub use worker::{EffectWorker, ObservedState, WorkerMode};
