//! Registry of running listener tasks, one per mailbox.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Owns the per-mailbox session tasks.
///
/// `start` is idempotent: a mailbox with a live handle is left alone, even
/// if its task has not begun executing yet. Stopping is implicit; sessions
/// observe their activity flag and exit on their own, leaving a finished
/// handle behind that the next `start` replaces.
#[derive(Default)]
pub struct ListenerSupervisor {
    sessions: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl ListenerSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `run` as this mailbox's session unless one is already live.
    pub async fn start<F>(&self, box_id: i64, run: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut sessions = self.sessions.lock().await;
        match sessions.entry(box_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_finished() {
                    tracing::info!(box_id, "replacing finished listener");
                    entry.insert(tokio::spawn(run));
                } else {
                    tracing::debug!(box_id, "listener already running");
                }
            }
            Entry::Vacant(entry) => {
                tracing::info!(box_id, "starting listener");
                entry.insert(tokio::spawn(run));
            }
        }
    }

    /// Whether a live (not yet finished) session exists for this mailbox.
    pub async fn is_running(&self, box_id: i64) -> bool {
        self.sessions
            .lock()
            .await
            .get(&box_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort every task. Used on shutdown only; normal stops go through the
    /// activity flag.
    pub async fn abort_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (box_id, handle) in sessions.drain() {
            tracing::debug!(box_id, "aborting listener");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ListenerSupervisor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn second_start_for_a_live_session_is_a_no_op() {
        let supervisor = ListenerSupervisor::new();
        let started = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let started = Arc::clone(&started);
            supervisor
                .start(1, async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<()>().await;
                })
                .await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(supervisor.is_running(1).await);
        supervisor.abort_all().await;
    }

    #[tokio::test]
    async fn finished_sessions_are_replaced() {
        let supervisor = ListenerSupervisor::new();

        supervisor.start(1, async {}).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!supervisor.is_running(1).await);

        supervisor.start(1, std::future::pending()).await;
        assert!(supervisor.is_running(1).await);
        supervisor.abort_all().await;
    }

    #[tokio::test]
    async fn sessions_are_tracked_per_mailbox() {
        let supervisor = ListenerSupervisor::new();
        supervisor.start(1, std::future::pending()).await;
        supervisor.start(2, std::future::pending()).await;
        assert!(supervisor.is_running(1).await);
        assert!(supervisor.is_running(2).await);
        assert!(!supervisor.is_running(3).await);
        supervisor.abort_all().await;
    }
}
