//! Fixed-interval poll loop with cooperative cancellation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::controller::TickOutcome;
use crate::error::EnforcementError;
use crate::hysteresis::ControllerState;

/// Floor for the poll period; `time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Anything the scheduler can drive.
#[async_trait]
pub trait ControlLoop: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ControllerState;

    async fn poll(&mut self) -> TickOutcome;

    async fn release(&mut self) -> Vec<EnforcementError>;
}

/// Poll `controller` every `interval` until `shutdown` is cancelled.
///
/// The first poll happens immediately. Cancellation is only observed
/// between ticks, so an enforcement batch in progress always completes.
/// A tick that overruns the interval delays the next one instead of
/// bursting. The controller is handed back so the caller can release it.
pub async fn run<C: ControlLoop>(
    mut controller: C,
    interval: Duration,
    shutdown: CancellationToken,
) -> C {
    let interval = interval.max(MIN_INTERVAL);
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        controller = controller.name(),
        "started, polling every {}ms",
        interval.as_millis()
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = controller.poll().await;
                debug!(
                    controller = controller.name(),
                    tick = outcome.tick(),
                    state = %controller.state(),
                    "tick done"
                );
            }
        }
    }

    info!(
        controller = controller.name(),
        state = %controller.state(),
        "stopped"
    );
    controller
}

/// Spawn [`run`] on the current runtime.
pub fn spawn<C>(controller: C, interval: Duration, shutdown: CancellationToken) -> JoinHandle<C>
where
    C: ControlLoop + 'static,
{
    tokio::spawn(run(controller, interval, shutdown))
}
