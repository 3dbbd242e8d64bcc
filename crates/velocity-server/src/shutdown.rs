//! Process-wide shutdown signal.
//!
//! One [`CancellationToken`] is shared by the listener and the sweep task.
//! [`ShutdownCoordinator::graceful_shutdown`] fires it, then gives the tracked
//! tasks a single shared deadline; whatever is still running after that is
//! aborted.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Deadline used when the caller does not pass one.
const DEFAULT_DRAIN: Duration = Duration::from_secs(30);

/// Owner of the shutdown token.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose token has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle on the shared token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the token has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the token and wait for `handles` until `timeout` elapses.
    ///
    /// Returns how many tasks had to be aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> usize {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN);
        let deadline = Instant::now() + timeout;
        self.shutdown();
        info!(tasks = handles.len(), timeout_secs = timeout.as_secs(), "draining tasks");

        let mut aborted = 0;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "task failed during shutdown"),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            warn!(aborted, "shutdown deadline passed, remaining tasks aborted");
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_fires_once_for_every_clone() {
        let coord = ShutdownCoordinator::new();
        let a = coord.token();
        let b = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[tokio::test]
    async fn cooperative_tasks_finish_without_abort() {
        let coord = ShutdownCoordinator::new();
        let handles = (0..3)
            .map(|_| {
                let token = coord.token();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();
        assert_eq!(coord.graceful_shutdown(handles, None).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_aborted_at_the_shared_deadline() {
        let coord = ShutdownCoordinator::new();
        let stubborn = || {
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(300)).await;
            })
        };
        let started = Instant::now();
        let aborted = coord
            .graceful_shutdown(vec![stubborn(), stubborn()], Some(Duration::from_secs(1)))
            .await;
        assert_eq!(aborted, 2);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn panicked_task_is_not_counted_as_aborted() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async { panic!("boom") });
        assert_eq!(coord.graceful_shutdown(vec![handle], None).await, 0);
    }
}
