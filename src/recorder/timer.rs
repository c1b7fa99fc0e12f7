use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Drives a recorder clock on a fixed interval.
///
/// The callback runs once per period until it returns `false` or the timer
/// is stopped. Dropping the timer stops it.
pub struct DurationTimer {
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DurationTimer {
    /// One tick per second
    pub fn every_second<F, Fut>(on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::start(Duration::from_secs(1), on_tick)
    }

    pub fn start<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; skip it so tick 1 lands at 1 period
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Duration timer cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !on_tick().await {
                            debug!("Duration timer finished");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            cancellation_token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop ticking. Safe to call more than once.
    pub fn stop(&mut self) {
        self.cancellation_token.cancel();
        self.handle.take();
    }

    /// Stop and wait for the tick task to exit
    pub async fn join(mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for DurationTimer {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
