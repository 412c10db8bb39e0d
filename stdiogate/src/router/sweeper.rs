use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::MessageRouter;

/// What the periodic sweep enforces. `None` disables that half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepConfig {
    pub request_timeout: Option<Duration>,
    pub session_idle_timeout: Option<Duration>,
}

impl SweepConfig {
    /// A quarter of the shortest limit, clamped to 10ms..1s.
    fn period(&self) -> Option<Duration> {
        [self.request_timeout, self.session_idle_timeout]
            .into_iter()
            .flatten()
            .min()
            .map(|shortest| (shortest / 4).clamp(Duration::from_millis(10), Duration::from_secs(1)))
    }
}

/// Periodically fail requests that outlived the request timeout and close
/// sessions idle past the idle timeout, until `shutdown` is cancelled.
///
/// Returns `None` when both limits are disabled.
pub fn spawn_sweeper(
    router: Arc<MessageRouter>,
    config: SweepConfig,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let period = config.period()?;
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(timeout) = config.request_timeout {
                        let expired = router.expire_overdue(timeout);
                        if expired > 0 {
                            tracing::debug!(expired, "timeout sweep");
                        }
                    }
                    if let Some(idle) = config.session_idle_timeout {
                        let closed = router.close_idle(idle);
                        if closed > 0 {
                            tracing::info!(closed, "closed idle sessions");
                        }
                    }
                }
            }
        }
    }))
}
