//! Frame model and the boundary to the LED hardware.
//!
//! The candlestick is a column of seven RGB LEDs. A frame is written as a
//! whole; the direction parameter remaps the physical emit order the same
//! way the serial framing does, so vertical effects mirror around the
//! center LED.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use wick_core::Direction;

/// Number of LEDs on the column.
pub const LED_COUNT: usize = 7;

/// One LED color, `[r, g, b]`.
pub type Rgb = [u8; 3];

pub const BLACK: Rgb = [0, 0, 0];

/// Emit order of the seven LEDs for a given direction.
///
/// `right` (and unset) is the natural order, `left` reverses it, and
/// `up`/`down` fold the column around LED 3 so motion appears to radiate
/// from one end toward the center and back out.
pub fn frame_order(direction: Option<Direction>) -> [usize; LED_COUNT] {
    match direction {
        None | Some(Direction::Right) => [0, 1, 2, 3, 4, 5, 6],
        Some(Direction::Left) => [6, 5, 4, 3, 2, 1, 0],
        Some(Direction::Down) => [3, 2, 1, 0, 1, 2, 3],
        Some(Direction::Up) => [0, 1, 2, 3, 2, 1, 0],
    }
}

/// Parse an HTML color code (`#rrggbb`, leading `#` optional).
pub fn parse_html_color(code: &str) -> Option<Rgb> {
    let hex = code.strip_prefix('#').unwrap_or(code);
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Where frames go. Implementations may block; callers run on the effect
/// worker thread, never on the async runtime.
pub trait LedLink: Send {
    fn write_frame(&mut self, frame: &[Rgb; LED_COUNT], direction: Option<Direction>);
}

/// Log-only link used when no hardware is attached: effects "run" without
/// physical output so everything upstream behaves identically.
#[derive(Default)]
pub struct SimLink;

impl SimLink {
    pub fn new() -> Self {
        Self
    }
}

impl LedLink for SimLink {
    fn write_frame(&mut self, frame: &[Rgb; LED_COUNT], direction: Option<Direction>) {
        let ordered: Vec<Rgb> = frame_order(direction).iter().map(|&i| frame[i]).collect();
        debug!(?ordered, "frame");
    }
}

/// Test link that records every frame it is handed. Clones share the
/// underlying buffer.
#[derive(Clone, Default)]
pub struct RecordingLink {
    frames: Arc<Mutex<Vec<([Rgb; LED_COUNT], Option<Direction>)>>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<([Rgb; LED_COUNT], Option<Direction>)> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl LedLink for RecordingLink {
    fn write_frame(&mut self, frame: &[Rgb; LED_COUNT], direction: Option<Direction>) {
        self.frames.lock().push((*frame, direction));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_is_natural_order() {
        assert_eq!(frame_order(Some(Direction::Right)), [0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(frame_order(None), [0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn left_is_reversed() {
        assert_eq!(frame_order(Some(Direction::Left)), [6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn vertical_orders_mirror_around_center() {
        assert_eq!(frame_order(Some(Direction::Down)), [3, 2, 1, 0, 1, 2, 3]);
        assert_eq!(frame_order(Some(Direction::Up)), [0, 1, 2, 3, 2, 1, 0]);
    }

    #[test]
    fn parse_html_color_accepts_hash_prefix() {
        assert_eq!(parse_html_color("#ff0000"), Some([255, 0, 0]));
        assert_eq!(parse_html_color("00fa7b"), Some([0, 250, 123]));
    }

    #[test]
    fn parse_html_color_rejects_garbage() {
        assert_eq!(parse_html_color("#ff00"), None);
        assert_eq!(parse_html_color("#gg0000"), None);
        assert_eq!(parse_html_color(""), None);
    }

    #[test]
    fn recording_link_captures_frames() {
        let mut link = RecordingLink::new();
        let frame = [[1, 2, 3]; LED_COUNT];
        link.write_frame(&frame, Some(Direction::Up));
        let frames = link.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, Some(Direction::Up));
    }
}
