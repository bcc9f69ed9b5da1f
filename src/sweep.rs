//! Reconciliation sweep: repair drift between durable mailbox state and
//! the cache's activity flags.

use crate::cache::{ActivityFlag, KeyValueCache};
use crate::error::Result;
use crate::repository::SharedRepository;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub checked: usize,
    pub repaired: usize,
}

/// One reconciliation pass over every mailbox.
///
/// Rewrites a flag only when one is present and disagrees with the durable
/// state; absent flags are left absent, and no sessions are started or
/// stopped here. Listeners react to the corrected flags on their own.
pub async fn reconcile(repository: &SharedRepository, cache: &KeyValueCache) -> Result<SweepStats> {
    let mut stats = SweepStats::default();

    for mailbox in repository.list_all_mailboxes().await? {
        stats.checked += 1;
        let desired = ActivityFlag::from_active(mailbox.is_active);
        match cache.activity(mailbox.telegram_id, mailbox.id) {
            Some(observed) if observed != desired => {
                tracing::info!(
                    box_id = mailbox.id,
                    observed = observed.as_str(),
                    desired = desired.as_str(),
                    "repairing activity flag drift"
                );
                cache.set_activity(mailbox.telegram_id, mailbox.id, desired);
                stats.repaired += 1;
            }
            _ => {}
        }
    }

    Ok(stats)
}

/// Run [`reconcile`] forever on a fixed interval.
pub fn spawn(
    repository: SharedRepository,
    cache: KeyValueCache,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so boot-time flag
        // writes settle first.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match reconcile(&repository, &cache).await {
                Ok(stats) => {
                    tracing::info!(
                        checked = stats.checked,
                        repaired = stats.repaired,
                        "reconciliation sweep finished"
                    );
                }
                Err(error) => {
                    tracing::warn!(%error, "reconciliation sweep failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::reconcile;
    use crate::cache::{ActivityFlag, KeyValueCache};
    use crate::repository::{MemoryRepository, Repository, SharedRepository};
    use std::sync::Arc;
    use std::time::Duration;

    async fn seeded() -> SharedRepository {
        let repository = MemoryRepository::new();
        repository.create_user(7).await.unwrap();
        repository
            .create_service("Example", "imap.example.com", 993)
            .await
            .unwrap();
        repository
            .create_mailbox(7, 1, "me@example.com", "enc")
            .await
            .unwrap();
        Arc::new(repository)
    }

    fn cache() -> KeyValueCache {
        KeyValueCache::new(1024, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn disagreeing_flag_is_rewritten() {
        let repository = seeded().await;
        let cache = cache();
        cache.set_activity(7, 1, ActivityFlag::Inactive);

        let stats = reconcile(&repository, &cache).await.unwrap();

        assert_eq!(stats.repaired, 1);
        assert_eq!(cache.activity(7, 1), Some(ActivityFlag::Active));
    }

    #[tokio::test]
    async fn absent_flag_stays_absent() {
        let repository = seeded().await;
        let cache = cache();

        let stats = reconcile(&repository, &cache).await.unwrap();

        assert_eq!(stats.repaired, 0);
        assert_eq!(cache.activity(7, 1), None);
    }

    #[tokio::test]
    async fn matching_flag_is_untouched() {
        let repository = seeded().await;
        let cache = cache();
        cache.set_activity(7, 1, ActivityFlag::Active);

        let stats = reconcile(&repository, &cache).await.unwrap();

        assert_eq!(stats.checked, 1);
        assert_eq!(stats.repaired, 0);
    }
}
