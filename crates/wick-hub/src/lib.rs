//! # wick-hub
//!
//! The central hub: an authoritative registry of candlestick sessions and
//! last-known state, per-connection WebSocket loops feeding it, observer
//! fan-out, a stale-state reaper, and the REST facade operator UIs talk to.

#![deny(unsafe_code)]

pub mod registry;
pub mod routes;
pub mod server;
pub mod session;

pub use registry::{start_reaper, DeviceRegistry, DeviceSession, RegistryError};
pub use server::{build_router, start, AppState, HubConfig, HubHandle};
