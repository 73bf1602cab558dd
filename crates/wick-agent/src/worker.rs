//! The isolated execution worker.
//!
//! Exactly one dedicated OS thread owns the hardware link and runs the
//! active effect; it is the only place blocking I/O is allowed. Every
//! program, direction or color change restarts the worker: the old thread
//! is signalled and joined before the new one spawns, so two workers can
//! never race on the same link. In random mode the thread picks a fresh
//! program and direction per cycle and publishes the observed pair on a
//! watch channel for the reconciler to poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use wick_core::Direction;
use wick_effects::{
    random_direction, random_program, run_cycle, LedLink, Rgb, SpeedHandle, Ticker, BLACK,
    LED_COUNT,
};

/// What the worker thread should run.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerMode {
    /// A fixed pattern; a missing direction is chosen at spawn.
    Pattern {
        program: String,
        direction: Option<Direction>,
    },
    /// Rotate through the pattern pool, one random pick per cycle.
    Random,
    /// Hold one color on the whole column.
    StaticColor(Rgb),
    /// All LEDs off.
    Blank,
}

/// The `(program, direction)` pair the worker is actually executing.
/// Starts empty; static-color and blank modes leave it untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedState {
    pub program: Option<String>,
    pub direction: Option<Direction>,
}

struct ActiveWorker {
    stop: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

/// Owns the worker thread lifecycle. All transitions go through
/// [`EffectWorker::restart`] or [`EffectWorker::stop`], which join the
/// previous thread before returning.
pub struct EffectWorker {
    speed: SpeedHandle,
    link_factory: Box<dyn Fn() -> Box<dyn LedLink> + Send + Sync>,
    observed_tx: watch::Sender<ObservedState>,
    active: Option<ActiveWorker>,
}

impl EffectWorker {
    pub fn new(
        speed: SpeedHandle,
        link_factory: Box<dyn Fn() -> Box<dyn LedLink> + Send + Sync>,
    ) -> (Self, watch::Receiver<ObservedState>) {
        let (observed_tx, observed_rx) = watch::channel(ObservedState::default());
        (
            Self {
                speed,
                link_factory,
                observed_tx,
                active: None,
            },
            observed_rx,
        )
    }

    /// Stop whatever is running and start `mode`. The old thread is
    /// confirmed dead before the new one spawns.
    pub async fn restart(&mut self, mode: WorkerMode) {
        self.stop().await;
        info!(?mode, "starting effect worker");

        let stop = Arc::new(AtomicBool::new(false));
        let link = (self.link_factory)();
        let speed = self.speed.clone();
        let observed = self.observed_tx.clone();
        let flag = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("effect-worker".into())
            .spawn(move || worker_loop(mode, link, speed, flag, observed));
        match spawned {
            Ok(thread) => self.active = Some(ActiveWorker { stop, thread }),
            Err(e) => error!(error = %e, "failed to spawn effect worker"),
        }
    }

    /// Signal the running thread and join it. The join happens on the
    /// blocking pool so the agent's event loop never stalls on it.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.stop.store(true, Ordering::Relaxed);
        match tokio::task::spawn_blocking(move || active.thread.join()).await {
            Ok(Ok(())) => debug!("effect worker stopped"),
            // A crashed worker is not restarted here; the next command or
            // inactivity reset brings a program back.
            Ok(Err(_)) => warn!("effect worker panicked"),
            Err(e) => warn!(error = %e, "failed to join effect worker"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

fn worker_loop(
    mode: WorkerMode,
    mut link: Box<dyn LedLink>,
    speed: SpeedHandle,
    stop: Arc<AtomicBool>,
    observed: watch::Sender<ObservedState>,
) {
    let ticker = Ticker::new(speed, Arc::clone(&stop));
    match mode {
        WorkerMode::Blank => hold_frame(link.as_mut(), [BLACK; LED_COUNT], &stop),
        WorkerMode::StaticColor(rgb) => hold_frame(link.as_mut(), [rgb; LED_COUNT], &stop),
        WorkerMode::Random => {
            while !stop.load(Ordering::Relaxed) {
                let program = random_program();
                let direction = random_direction();
                observed.send_replace(ObservedState {
                    program: Some(program.to_string()),
                    direction: Some(direction),
                });
                info!(program, %direction, "random cycle");
                run_cycle(program, link.as_mut(), &ticker, direction);
            }
        }
        WorkerMode::Pattern { program, direction } => {
            let direction = direction.unwrap_or_else(random_direction);
            observed.send_replace(ObservedState {
                program: Some(program.clone()),
                direction: Some(direction),
            });
            while !stop.load(Ordering::Relaxed) {
                if !run_cycle(&program, link.as_mut(), &ticker, direction) {
                    break; // unknown program, nothing to render
                }
            }
        }
    }
    debug!("effect worker exiting");
}

/// Write one frame and sit on it until told to stop.
fn hold_frame(link: &mut dyn LedLink, frame: [Rgb; LED_COUNT], stop: &AtomicBool) {
    link.write_frame(&frame, None);
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
}
