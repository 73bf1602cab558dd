//! Agent configuration.
//!
//! Values resolve in precedence order: command-line flags (applied by the
//! binary on top of this struct), then environment variables, then the
//! compiled defaults. Invalid environment values are logged and ignored.

use std::time::Duration;

pub const DEFAULT_HUB_URL: &str = "ws://localhost:8000";
pub const DEFAULT_DEVICE_ID: &str = "candlestick_001";

/// Everything the device agent needs to run.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// WebSocket base URL of the hub, e.g. `ws://localhost:8000`.
    pub hub_url: String,
    /// Stable identifier of this candlestick.
    pub device_id: String,
    /// Idle time without a command before the watchdog resets to defaults.
    pub inactivity_timeout: Duration,
    /// Fixed pause between reconnect attempts.
    pub reconnect_delay: Duration,
    /// How often a heartbeat is emitted while connected.
    pub heartbeat_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            inactivity_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `WICK_*` environment variables over the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("WICK_HUB_URL") {
            self.hub_url = v;
        }
        if let Some(v) = read_env_string("WICK_DEVICE_ID") {
            self.device_id = v;
        }
        if let Some(v) = read_env_u64("WICK_INACTIVITY_TIMEOUT", 1, 86_400) {
            self.inactivity_timeout = Duration::from_secs(v);
        }
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
