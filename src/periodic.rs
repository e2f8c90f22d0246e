//! Fixed-interval background tasks that stop on shutdown

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Run `task` every `period`, starting immediately, until `shutdown_rx`
/// flips to true or its sender is dropped.
///
/// Runs never overlap: a slow run delays the next tick instead of stacking.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if *shutdown_rx.borrow() {
            return;
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(task = name, "Periodic task stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    task().await;
                }
            }
        }
    })
}
