//! Cancellable periodic background tasks.
//!
//! Auto-sync, cache eviction, the outbox sweep, and the health probe all
//! run through this helper: an interval loop that stops when its token is
//! cancelled.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn a task that runs `work` every `period` until `cancel` fires.
///
/// The first run happens one period after spawning, not immediately.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut work: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(task = name, "periodic task stopped");
                    break;
                }
                _ = timer.tick() => work().await,
            }
        }
    })
}
