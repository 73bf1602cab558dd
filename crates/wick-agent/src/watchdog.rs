//! Inactivity watchdog.
//!
//! Polls the controller's idle marker on a fixed interval; once the
//! configured quiet period has passed since the last command, local
//! state is reset to the hard-coded defaults, the worker restarts on
//! them and a status announces the reset. The marker is cleared when it
//! fires, so one idle period produces exactly one reset — the clock only
//! restarts with the next command.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::StatusSender;
use crate::controller::CandleController;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watch for command inactivity until the token fires.
pub fn start_watchdog(
    controller: Arc<CandleController>,
    status: StatusSender,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.tick().await; // consume the immediate tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if controller.take_expired_idle(timeout) {
                        info!(
                            timeout_secs = timeout.as_secs(),
                            "no command within timeout, resetting to defaults"
                        );
                        controller.reset_to_defaults().await;
                        status.send(controller.snapshot());
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU8;
    use tokio::sync::mpsc;
    use wick_core::{CommandPayload, StatusPayload};
    use wick_effects::{LedLink, RecordingLink};

    use crate::agent::ConnectionState;

    fn connected_status() -> (StatusSender, mpsc::Receiver<StatusPayload>) {
        let (tx, rx) = mpsc::channel(8);
        let sender = StatusSender::new(
            Arc::new(AtomicU8::new(ConnectionState::Connected.as_u8())),
            tx,
        );
        (sender, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn resets_once_per_idle_period() {
        let link = RecordingLink::new();
        let (controller, _observed) =
            CandleController::new(move || Box::new(link.clone()) as Box<dyn LedLink>);
        let (status, mut rx) = connected_status();
        let cancel = CancellationToken::new();
        let handle = start_watchdog(
            Arc::clone(&controller),
            status,
            Duration::from_secs(60),
            cancel.clone(),
        );

        // Arm the clock with a speed-only command
        controller
            .apply(&CommandPayload {
                speed: Some(42),
                ..Default::default()
            })
            .await;

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.program.as_deref(), Some("random"));
        assert_eq!(payload.random, Some(true));
        assert_eq!(payload.speed, Some(10));

        // Staying idle does not reset again
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());

        // The next command re-arms the clock for one more reset
        controller
            .apply(&CommandPayload {
                speed: Some(77),
                ..Default::default()
            })
            .await;
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.speed, Some(10));

        cancel.cancel();
        handle.await.unwrap();
        controller.shutdown().await;
    }
}
