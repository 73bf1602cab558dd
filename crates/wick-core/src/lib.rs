//! # wick-core
//!
//! Shared protocol and state types for the candlestick hub and device agent:
//! the three wire message shapes, device state snapshots, and commands.
//! No I/O lives here.

#![deny(unsafe_code)]

pub mod message;
pub mod state;

pub use message::{CommandPayload, StatusPayload, WireMessage};
pub use state::{DeviceState, Direction};
