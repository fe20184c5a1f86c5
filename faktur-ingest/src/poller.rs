//! Shared periodic poller scaffolding.
//!
//! Runs one tick immediately, then on every interval until the cancellation
//! token fires. `stop()` on the owning poller is cooperative: an in-flight
//! tick (including its HTTP requests) is never interrupted, it just becomes
//! the last one.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) fn spawn_poller<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        debug!("{} poller started (period {:?})", name, period);
        tick().await;

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // the immediate first tick; already ran

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} poller stopped", name);
                    break;
                }
                _ = interval.tick() => tick().await,
            }
        }
    })
}
