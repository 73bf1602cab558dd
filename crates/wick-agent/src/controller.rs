//! Local command application.
//!
//! One controller instance owns the device-side state and the effect
//! worker; it is created by the agent wiring and passed around
//! explicitly, so tests can run independent controllers side by side.
//! Command application is serialized by the agent's in-order dispatch;
//! the watchdog is the only other writer and goes through the same
//! methods.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::{info, warn};
use wick_core::{CommandPayload, StatusPayload};
use wick_effects::{parse_html_color, LedLink, SpeedHandle};

use crate::agent::{CommandHandler, StatusSender};
use crate::worker::{EffectWorker, ObservedState, WorkerMode};

pub const DEFAULT_PROGRAM: &str = "random";
pub const DEFAULT_SPEED: u8 = 10;

/// Named program that blanks the column instead of rendering.
const STOP_PROGRAM: &str = "stop";

struct LocalState {
    /// Commanded program name; `random` means the worker self-selects.
    program: String,
    random_mode: bool,
    /// Commanded direction, if any.
    direction: Option<wick_core::Direction>,
    /// Static color, set only while a color command is active.
    color: Option<String>,
    /// What the worker reports as actually executing.
    running_program: Option<String>,
    running_direction: Option<wick_core::Direction>,
    /// Arms the inactivity watchdog; `None` once it has fired.
    last_command: Option<Instant>,
}

impl LocalState {
    fn defaults() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            random_mode: true,
            direction: None,
            color: None,
            running_program: None,
            running_direction: None,
            last_command: None,
        }
    }
}

pub struct CandleController {
    state: Mutex<LocalState>,
    speed: SpeedHandle,
    worker: AsyncMutex<EffectWorker>,
}

impl CandleController {
    /// Build a controller and its worker. The returned receiver carries
    /// the worker's observed `(program, direction)` pair for the
    /// reconciler.
    pub fn new(
        link_factory: impl Fn() -> Box<dyn LedLink> + Send + Sync + 'static,
    ) -> (Arc<Self>, watch::Receiver<ObservedState>) {
        let speed = SpeedHandle::new(DEFAULT_SPEED);
        let (worker, observed) = EffectWorker::new(speed.clone(), Box::new(link_factory));
        let controller = Arc::new(Self {
            state: Mutex::new(LocalState::defaults()),
            speed,
            worker: AsyncMutex::new(worker),
        });
        (controller, observed)
    }

    /// Start the default program (random rotation). Called once at boot.
    pub async fn start_default_program(&self) {
        self.restart_worker().await;
    }

    /// Apply one command, field by field, restarting the worker where
    /// the field demands it. `speed` never restarts: the running pattern
    /// reads the shared value on every frame.
    pub async fn apply(&self, command: &CommandPayload) {
        info!(?command, "applying command");

        if let Some(direction) = command.direction {
            self.state.lock().direction = Some(direction);
            self.restart_worker().await;
        }

        if let Some(program) = &command.program {
            {
                let mut state = self.state.lock();
                state.program = program.clone();
                state.random_mode = program == DEFAULT_PROGRAM;
                state.color = None;
            }
            if program == STOP_PROGRAM {
                self.worker.lock().await.restart(WorkerMode::Blank).await;
            } else {
                self.restart_worker().await;
            }
        }

        if let Some(speed) = command.speed {
            self.speed.set(speed);
        }

        if let Some(color) = &command.color {
            match parse_html_color(color) {
                Some(rgb) => {
                    self.state.lock().color = Some(color.clone());
                    self.worker
                        .lock()
                        .await
                        .restart(WorkerMode::StaticColor(rgb))
                        .await;
                }
                None => warn!(color, "ignoring unparseable color"),
            }
        }

        self.state.lock().last_command = Some(Instant::now());
    }

    /// Record what the worker reports as actually running.
    pub fn note_observed(&self, observed: &ObservedState) {
        let mut state = self.state.lock();
        state.running_program = observed.program.clone();
        state.running_direction = observed.direction;
    }

    /// Status snapshot from the device's own point of view. In random
    /// mode the actually-running program and direction are reported, not
    /// the literal `random` label (until the first observation arrives).
    pub fn snapshot(&self) -> StatusPayload {
        let state = self.state.lock();
        let program = if state.random_mode {
            state
                .running_program
                .clone()
                .or_else(|| Some(state.program.clone()))
        } else {
            Some(state.program.clone())
        };
        let direction = if state.random_mode {
            state.running_direction
        } else {
            state.direction.or(state.running_direction)
        };
        StatusPayload {
            program,
            random: Some(state.random_mode),
            speed: Some(self.speed.get()),
            direction,
            color: state.color.clone(),
        }
    }

    /// True once `timeout` has strictly passed since the last command.
    /// Clears the marker, so the caller resets at most once per idle
    /// period; only the next command re-arms it.
    pub fn take_expired_idle(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        match state.last_command {
            Some(at) if at.elapsed() > timeout => {
                state.last_command = None;
                true
            }
            _ => false,
        }
    }

    /// Back to the hard-coded defaults, worker restarted on them.
    pub async fn reset_to_defaults(&self) {
        info!("resetting to defaults");
        *self.state.lock() = LocalState::defaults();
        self.speed.set(DEFAULT_SPEED);
        self.restart_worker().await;
    }

    /// Stop the worker thread. Used on agent teardown.
    pub async fn shutdown(&self) {
        self.worker.lock().await.stop().await;
    }

    async fn restart_worker(&self) {
        let mode = {
            let state = self.state.lock();
            if state.random_mode {
                WorkerMode::Random
            } else {
                WorkerMode::Pattern {
                    program: state.program.clone(),
                    direction: state.direction,
                }
            }
        };
        self.worker.lock().await.restart(mode).await;
    }
}

#[async_trait]
impl CommandHandler for CandleController {
    async fn on_connect(&self, status: &StatusSender) {
        status.send(self.snapshot());
    }

    async fn on_command(&self, command: CommandPayload, status: &StatusSender) {
        self.apply(&command).await;
        status.send(self.snapshot());
    }
}
