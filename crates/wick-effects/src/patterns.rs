//! Pattern renderers.
//!
//! Each pattern renders one cycle (a few visual rounds) per call and
//! returns; the worker loop calls it again until told to stop. Delays are
//! scaled by the shared speed value on every frame, so a speed command
//! takes effect mid-cycle without a restart.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};
use wick_core::Direction;

use crate::link::{LedLink, Rgb, BLACK, LED_COUNT};

const RED: Rgb = [250, 0, 0];
const ORANGE: Rgb = [250, 127, 0];
const YELLOW: Rgb = [250, 250, 0];
const GREEN: Rgb = [0, 250, 0];
const BLUE: Rgb = [0, 0, 250];
const CYAN: Rgb = [139, 0, 250];
const WHITE: Rgb = [250, 250, 250];

const COLORS: [Rgb; 7] = [RED, ORANGE, YELLOW, GREEN, CYAN, BLUE, WHITE];

/// Programs a command can name.
pub const PATTERN_NAMES: [&str; 5] = ["fall", "wave", "bounce", "cop", "rb"];

/// Pool the random mode draws from. The rainbow appears twice to show up
/// a bit more often than the rest.
const RANDOM_POOL: [&str; 6] = ["fall", "wave", "bounce", "cop", "rb", "rb"];

const DIRECTIONS: [Direction; 4] = [
    Direction::Right,
    Direction::Up,
    Direction::Down,
    Direction::Left,
];

pub fn random_program() -> &'static str {
    RANDOM_POOL.choose(&mut rand::thread_rng()).unwrap()
}

pub fn random_direction() -> Direction {
    *DIRECTIONS.choose(&mut rand::thread_rng()).unwrap()
}

/// Speed setting shared between the agent and the running pattern.
/// Commands store into it; patterns read it per frame.
#[derive(Clone)]
pub struct SpeedHandle(Arc<AtomicU8>);

impl SpeedHandle {
    pub fn new(speed: u8) -> Self {
        Self(Arc::new(AtomicU8::new(speed)))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed).max(1)
    }

    pub fn set(&self, speed: u8) {
        self.0.store(speed.clamp(1, 100), Ordering::Relaxed);
    }
}

/// Scale a base frame delay by the current speed.
///
/// Speed 10 is neutral. Above 10 the delay shrinks quadratically (the
/// high end feels much faster), below 10 it grows linearly.
pub fn scaled_delay(base: Duration, speed: u8) -> Duration {
    let s = f64::from(speed.max(1));
    let factor = if speed >= 10 { 100.0 / (s * s) } else { 10.0 / s };
    base.mul_f64(factor)
}

/// Per-frame pacing and stop checks for a running pattern.
pub struct Ticker {
    speed: SpeedHandle,
    stop: Arc<AtomicBool>,
}

impl Ticker {
    pub fn new(speed: SpeedHandle, stop: Arc<AtomicBool>) -> Self {
        Self { speed, stop }
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleep for `base` scaled by the current speed. Returns `false` once
    /// a stop has been requested, so patterns can bail mid-cycle.
    pub fn pause(&self, base: Duration) -> bool {
        if self.stopped() {
            return false;
        }
        std::thread::sleep(scaled_delay(base, self.speed.get()));
        !self.stopped()
    }
}

/// Run one cycle of the named pattern. Returns `false` for an unknown
/// program name.
pub fn run_cycle(
    name: &str,
    link: &mut dyn LedLink,
    ticker: &Ticker,
    direction: Direction,
) -> bool {
    match name {
        "fall" => fall(link, ticker, direction),
        "wave" => wave(link, ticker, direction),
        "bounce" => bounce(link, ticker, direction),
        "cop" => cop(link, ticker),
        "rb" => rb(link, ticker, direction),
        other => {
            warn!(program = other, "unknown program");
            return false;
        }
    }
    true
}

fn is_horizontal(direction: Direction) -> bool {
    matches!(direction, Direction::Left | Direction::Right)
}

/// Picks colors without repeating the previous one.
struct ColorPicker {
    last: Option<usize>,
}

impl ColorPicker {
    fn new() -> Self {
        Self { last: None }
    }

    fn next(&mut self) -> Rgb {
        let mut rng = rand::thread_rng();
        let mut idx = rng.gen_range(0..COLORS.len());
        while Some(idx) == self.last {
            idx = rng.gen_range(0..COLORS.len());
        }
        self.last = Some(idx);
        COLORS[idx]
    }
}

/// A single lit LED sweeping out and back, dropping into the center.
fn fall(link: &mut dyn LedLink, ticker: &Ticker, direction: Direction) {
    let (rounds, delay) = if is_horizontal(direction) {
        (3, Duration::from_millis(150))
    } else {
        (5, Duration::from_millis(225))
    };
    info!(%direction, rounds, "fall");
    let dir = Some(direction);
    let mut picker = ColorPicker::new();
    let mut frame = [BLACK; LED_COUNT];

    for _ in 0..rounds {
        let color = picker.next();
        for x in [4usize, 5, 6] {
            if x == 4 {
                frame[3] = BLACK;
            }
            if x == 6 {
                frame[3] = color;
            }
            frame[x] = color;
            link.write_frame(&frame, dir);
            if !ticker.pause(delay) {
                return;
            }
            frame[x] = BLACK;
        }
        for x in [2usize, 1, 0] {
            if x == 2 {
                frame[3] = BLACK;
            }
            if x == 0 {
                frame[3] = color;
            }
            frame[x] = color;
            link.write_frame(&frame, dir);
            if !ticker.pause(delay) {
                return;
            }
            frame[x] = BLACK;
        }
    }
}

/// Fills the column one LED at a time in a fresh color per round.
fn wave(link: &mut dyn LedLink, ticker: &Ticker, direction: Direction) {
    let (led_count, rounds) = if is_horizontal(direction) { (7, 4) } else { (4, 6) };
    info!(%direction, "wave");
    let dir = Some(direction);
    let delay = Duration::from_millis(400);
    let mut picker = ColorPicker::new();
    let mut frame = [BLACK; LED_COUNT];

    for _ in 0..rounds {
        let color = picker.next();
        for x in 0..led_count {
            frame[x] = color;
            link.write_frame(&frame, dir);
            if !ticker.pause(delay) {
                return;
            }
        }
    }
}

/// One LED bouncing end to end, new color per sweep.
fn bounce(link: &mut dyn LedLink, ticker: &Ticker, direction: Direction) {
    let (led_count, rounds, delay) = if is_horizontal(direction) {
        (6usize, 3, Duration::from_millis(300))
    } else {
        (3usize, 5, Duration::from_millis(450))
    };
    info!(%direction, rounds, "bounce");
    let dir = Some(direction);
    let mut picker = ColorPicker::new();
    let mut frame = [BLACK; LED_COUNT];

    for _ in 0..rounds {
        let mut color = picker.next();
        for x in 0..led_count {
            frame[x] = color;
            link.write_frame(&frame, dir);
            if !ticker.pause(delay) {
                return;
            }
            frame[x] = BLACK;
        }
        color = picker.next();
        for x in (0..=led_count).rev() {
            frame[x] = color;
            link.write_frame(&frame, dir);
            if !ticker.pause(delay) {
                return;
            }
            frame[x] = BLACK;
        }
    }
}

/// Police strobe: two red/blue frames flashed against each other, the
/// split point walking along the column between flash bursts. Always
/// rendered in the natural order.
fn cop(link: &mut dyn LedLink, ticker: &Ticker) {
    const ROUNDS: usize = 4;
    const FLASHES: usize = 3;
    info!(rounds = ROUNDS, "cop");
    let delay = Duration::from_millis(500);
    let mut led1 = [RED, BLUE, BLUE, BLUE, RED, RED, BLUE];
    let mut led2 = [BLUE, RED, RED, RED, BLUE, BLUE, RED];

    for _ in 0..ROUNDS {
        for _ in 0..FLASHES {
            link.write_frame(&led1, Some(Direction::Right));
            if !ticker.pause(delay) {
                return;
            }
            link.write_frame(&led2, Some(Direction::Right));
            if !ticker.pause(delay) {
                return;
            }
        }
        led1.rotate_left(2);
        led2.rotate_left(2);
    }
}

/// Rainbow: the seven-color band rotates one LED per round, blending
/// between positions instead of snapping.
fn rb(link: &mut dyn LedLink, ticker: &Ticker, direction: Direction) {
    const ROUNDS: usize = 21;
    info!(%direction, "rainbow");
    let dir = Some(direction);
    let delay = Duration::from_millis(400);
    let mut led = COLORS;
    link.write_frame(&led, dir);

    for round in 0..ROUNDS {
        let mut goal = led;
        goal.rotate_left(1);
        if !blend_toward(link, &mut led, &goal, dir, ticker) {
            return;
        }
        if !ticker.pause(delay) {
            return;
        }
        debug!(round = round + 1, "rainbow round");
    }
}

/// Gradually transition the current frame to `goal` over 50 steps.
/// Returns `false` if stopped mid-blend.
fn blend_toward(
    link: &mut dyn LedLink,
    current: &mut [Rgb; LED_COUNT],
    goal: &[Rgb; LED_COUNT],
    direction: Option<Direction>,
    ticker: &Ticker,
) -> bool {
    const STEPS: u32 = 50;
    for step in (1..=STEPS).rev() {
        for x in 0..LED_COUNT {
            for i in 0..3 {
                current[x][i] = step_channel(current[x][i], goal[x][i], step);
            }
        }
        link.write_frame(current, direction);
        if ticker.stopped() {
            return false;
        }
        let step_delay = Duration::from_secs_f64(0.2 / f64::from(ticker.speed.get()));
        std::thread::sleep(step_delay);
    }
    *current = *goal;
    true
}

/// Move one channel toward its goal by an even share of the remaining
/// distance; small differences snap straight to the goal.
fn step_channel(now: u8, goal: u8, steps_left: u32) -> u8 {
    let a = f64::from(now);
    let b = f64::from(goal);
    let difference = (a - b).abs();
    if difference <= 2.0 {
        return goal;
    }
    let adjustment = difference / f64::from(steps_left);
    let next = if a < b { a + adjustment } else { a - adjustment };
    next as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RecordingLink;

    fn fast_ticker() -> (Ticker, Arc<AtomicBool>) {
        let stop = Arc::new(AtomicBool::new(false));
        (Ticker::new(SpeedHandle::new(100), stop.clone()), stop)
    }

    #[test]
    fn speed_handle_clamps() {
        let speed = SpeedHandle::new(10);
        speed.set(0);
        assert_eq!(speed.get(), 1);
        speed.set(250);
        assert_eq!(speed.get(), 100);
    }

    #[test]
    fn neutral_speed_keeps_base_delay() {
        let base = Duration::from_millis(400);
        assert_eq!(scaled_delay(base, 10), base);
    }

    #[test]
    fn high_speed_shrinks_delay_quadratically() {
        let base = Duration::from_millis(400);
        assert_eq!(scaled_delay(base, 100), Duration::from_millis(4));
    }

    #[test]
    fn low_speed_grows_delay() {
        let base = Duration::from_millis(100);
        assert_eq!(scaled_delay(base, 5), Duration::from_millis(200));
    }

    #[test]
    fn ticker_pause_reports_stop() {
        let (ticker, stop) = fast_ticker();
        assert!(ticker.pause(Duration::from_millis(1)));
        stop.store(true, Ordering::Relaxed);
        assert!(!ticker.pause(Duration::from_millis(1)));
    }

    #[test]
    fn color_picker_never_repeats() {
        let mut picker = ColorPicker::new();
        let mut last = picker.next();
        for _ in 0..50 {
            let next = picker.next();
            assert_ne!(next, last);
            last = next;
        }
    }

    #[test]
    fn step_channel_snaps_when_close() {
        assert_eq!(step_channel(101, 100, 50), 100);
        assert_eq!(step_channel(99, 100, 50), 100);
    }

    #[test]
    fn step_channel_moves_toward_goal() {
        let next = step_channel(0, 250, 50);
        assert!(next > 0 && next < 250);
        let next = step_channel(250, 0, 50);
        assert!(next < 250);
    }

    #[test]
    fn unknown_program_is_rejected() {
        let mut link = RecordingLink::new();
        let (ticker, _) = fast_ticker();
        assert!(!run_cycle("disco", &mut link, &ticker, Direction::Right));
        assert_eq!(link.frame_count(), 0);
    }

    #[test]
    fn wave_fills_the_column() {
        let mut link = RecordingLink::new();
        let (ticker, _) = fast_ticker();
        assert!(run_cycle("wave", &mut link, &ticker, Direction::Right));
        let frames = link.frames();
        // 4 rounds of 7 LEDs
        assert_eq!(frames.len(), 28);
        // Last frame of the first round has the whole column lit
        let (frame, dir) = &frames[6];
        assert_eq!(*dir, Some(Direction::Right));
        assert!(frame.iter().all(|led| *led != BLACK));
    }

    #[test]
    fn vertical_wave_uses_four_leds() {
        let mut link = RecordingLink::new();
        let (ticker, _) = fast_ticker();
        assert!(run_cycle("wave", &mut link, &ticker, Direction::Up));
        assert_eq!(link.frame_count(), 24); // 6 rounds of 4 LEDs
    }

    #[test]
    fn cop_alternates_red_blue() {
        let mut link = RecordingLink::new();
        let (ticker, _) = fast_ticker();
        assert!(run_cycle("cop", &mut link, &ticker, Direction::Right));
        let frames = link.frames();
        assert_eq!(frames.len(), 24); // 4 rounds x 3 flashes x 2 frames
        assert_ne!(frames[0].0, frames[1].0);
        // Every frame is pure red/blue
        assert!(frames
            .iter()
            .all(|(f, _)| f.iter().all(|led| *led == RED || *led == BLUE)));
    }

    #[test]
    fn stop_aborts_a_cycle_early() {
        let mut link = RecordingLink::new();
        let stop = Arc::new(AtomicBool::new(false));
        let ticker = Ticker::new(SpeedHandle::new(100), stop.clone());
        stop.store(true, Ordering::Relaxed);
        run_cycle("bounce", &mut link, &ticker, Direction::Right);
        // First frame is written, then the stop is noticed on the pause
        assert!(link.frame_count() <= 1);
    }
}
