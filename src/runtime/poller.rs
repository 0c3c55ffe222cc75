//! Fixed-interval background refresh
//!
//! Missed ticks are skipped, never queued. Cancelling the token stops new
//! ticks; a tick already in flight sees the cancelled token and is expected
//! to drop its results.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a running poller
pub struct PollerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops issuing new ticks
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels and waits for the poll loop to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            debug!(error = %e, "poller task ended abnormally");
        }
    }
}

/// Runs `tick` every `period` until cancelled or until `tick` returns false
///
/// The first tick fires immediately.
pub fn spawn_poller<F, Fut>(period: Duration, token: CancellationToken, mut tick: F) -> PollerHandle
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    let loop_token = token.clone();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = loop_token.cancelled() => break,
                _ = interval.tick() => {
                    if !tick(loop_token.clone()).await {
                        break;
                    }
                }
            }
        }

        debug!("poller stopped");
    });

    PollerHandle { token, task }
}
