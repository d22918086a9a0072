//! Background expiry of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use super::registry::SessionRegistry;

/// Periodically sweeps a registry using its liveness timeout.
///
/// Stop it with [`SessionSweeper::shutdown`], which waits for the task to
/// exit. Dropping the sweeper signals and aborts the task instead.
#[derive(Debug)]
pub struct SessionSweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionSweeper {
    /// Spawn a sweeper on the current tokio runtime.
    pub fn spawn(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.sweep();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("session sweeper stopped");
        });

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signal the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionSweeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweeper_removes_idle_sessions() {
        let registry = Arc::new(SessionRegistry::with_liveness_timeout(Duration::from_millis(20)));
        registry.create_session("127.0.0.1:6000".parse().unwrap());
        assert_eq!(registry.len(), 1);

        let sweeper = SessionSweeper::spawn(Arc::clone(&registry), Duration::from_millis(10));
        time::sleep(Duration::from_millis(100)).await;

        assert!(registry.is_empty());
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_shutdown_joins() {
        let registry = Arc::new(SessionRegistry::default());
        let sweeper = SessionSweeper::spawn(Arc::clone(&registry), Duration::from_millis(5));

        time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .unwrap();
    }
}
