use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction an effect travels across the LED array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        };
        write!(f, "{s}")
    }
}

/// Last-known state of a candlestick, as tracked by the hub.
///
/// One instance exists per device id that has ever connected. Optional
/// fields stay unset until the device reports them (or a command sets
/// them); they survive disconnects until the stale reaper removes the
/// whole entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceState {
    pub id: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: false,
            program: None,
            random: None,
            speed: None,
            direction: None,
            color: None,
            last_seen: Utc::now(),
        }
    }
}
