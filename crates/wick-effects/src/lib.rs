//! # wick-effects
//!
//! The physical-effect layer of a candlestick: the LED frame model, the
//! hardware-link boundary (with a log-only simulation used when no serial
//! link is wired in), and the pattern renderers. Everything here is
//! blocking by design and runs on the agent's dedicated worker thread.

#![deny(unsafe_code)]

pub mod link;
pub mod patterns;

pub use link::{frame_order, parse_html_color, LedLink, RecordingLink, Rgb, SimLink, BLACK, LED_COUNT};
pub use patterns::{
    random_direction, random_program, run_cycle, scaled_delay, SpeedHandle, Ticker, PATTERN_NAMES,
};
