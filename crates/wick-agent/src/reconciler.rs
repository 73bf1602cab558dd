//! Reconciles actually-running execution state back to the hub.
//!
//! In random mode the worker self-selects a program and direction each
//! cycle; the agent only learns of it through the worker's observed
//! channel. This loop polls that channel on a short fixed interval and,
//! whenever the pair changes, records it on the controller and emits a
//! status carrying the real running values — which is what lets
//! operators see the concrete effect active during random mode.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agent::StatusSender;
use crate::controller::CandleController;
use crate::worker::ObservedState;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll the observed channel until the token fires.
pub fn start_reconciler(
    controller: Arc<CandleController>,
    observed: watch::Receiver<ObservedState>,
    status: StatusSender,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Starting from the empty state means an observation published
        // before the first poll is still reported.
        let mut last = ObservedState::default();
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.tick().await; // consume the immediate tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let current = observed.borrow().clone();
                    if current != last && current.program.is_some() {
                        debug!(?current, "observed execution changed");
                        controller.note_observed(&current);
                        status.send(controller.snapshot());
                        last = current;
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
    use tokio::time::timeout;
    use wick_core::Direction;
    use wick_effects::LedLink;
    use wick_effects::RecordingLink;

    use crate::agent::ConnectionState;

    fn connected_status() -> (StatusSender, mpsc::Receiver<wick_core::StatusPayload>) {
        let (tx, rx) = mpsc::channel(8);
        let sender = StatusSender::new(
            Arc::new(AtomicU8::new(ConnectionState::Connected.as_u8())),
            tx,
        );
        (sender, rx)
    }

    fn controller() -> Arc<CandleController> {
        let link = RecordingLink::new();
        let (controller, _observed) =
            CandleController::new(move || Box::new(link.clone()) as Box<dyn LedLink>);
        controller
    }

    #[tokio::test(start_paused = true)]
    async fn emits_actual_values_when_observation_changes() {
        let controller = controller();
        let (observed_tx, observed_rx) = watch::channel(ObservedState::default());
        let (status, mut rx) = connected_status();
        let cancel = CancellationToken::new();
        let handle = start_reconciler(controller, observed_rx, status, cancel.clone());

        observed_tx.send_replace(ObservedState {
            program: Some("cop".into()),
            direction: Some(Direction::Up),
        });

        let payload = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.program.as_deref(), Some("cop"));
        assert_eq!(payload.random, Some(true));
        assert_eq!(payload.direction, Some(Direction::Up));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stays_quiet_without_a_change() {
        let controller = controller();
        let (observed_tx, observed_rx) = watch::channel(ObservedState::default());
        let (status, mut rx) = connected_status();
        let cancel = CancellationToken::new();
        let handle = start_reconciler(controller, observed_rx, status, cancel.clone());

        let running = ObservedState {
            program: Some("wave".into()),
            direction: Some(Direction::Left),
        };
        observed_tx.send_replace(running.clone());
        assert!(timeout(Duration::from_secs(5), rx.recv()).await.is_ok());

        // Same value again: polls keep passing, nothing is emitted
        observed_tx.send_replace(running);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
