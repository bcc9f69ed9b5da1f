//! User registration and activity.

use crate::cache::{ACTIVE_VALUE, ActivityFlag, INACTIVE_VALUE, KeyValueCache, keys};
use crate::error::Result;
use crate::models::User;
use crate::repository::SharedRepository;

#[derive(Clone)]
pub struct UserService {
    repository: SharedRepository,
    cache: KeyValueCache,
}

impl UserService {
    pub fn new(repository: SharedRepository, cache: KeyValueCache) -> Self {
        Self { repository, cache }
    }

    pub async fn create_user(&self, telegram_id: i64) -> Result<User> {
        let user = self.repository.create_user(telegram_id).await?;
        self.cache.delete_many(&[
            keys::user_exists(telegram_id),
            keys::user_is_active(telegram_id),
        ]);
        tracing::info!(telegram_id, "user created");
        Ok(user)
    }

    pub async fn user_exists(&self, telegram_id: i64) -> Result<bool> {
        let key = keys::user_exists(telegram_id);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached == ACTIVE_VALUE);
        }

        let exists = self.repository.user_exists(telegram_id).await?;
        self.cache
            .set_memoized(&key, if exists { ACTIVE_VALUE } else { INACTIVE_VALUE });
        Ok(exists)
    }

    pub async fn is_user_active(&self, telegram_id: i64) -> Result<bool> {
        let key = keys::user_is_active(telegram_id);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached == ACTIVE_VALUE);
        }

        let user = self.repository.get_user(telegram_id).await?;
        self.cache.set_memoized(
            &key,
            if user.is_active {
                ACTIVE_VALUE
            } else {
                INACTIVE_VALUE
            },
        );
        Ok(user.is_active)
    }

    /// Flip a user's activity. Deactivation cascades: every owned mailbox
    /// is deactivated durably and its activity flag flipped so running
    /// sessions wind down within one wait cycle.
    pub async fn set_user_active(&self, telegram_id: i64, is_active: bool) -> Result<()> {
        self.repository.set_user_active(telegram_id, is_active).await?;

        if !is_active {
            for mailbox in self.repository.list_user_mailboxes(telegram_id).await? {
                self.cache
                    .set_activity(telegram_id, mailbox.id, ActivityFlag::Inactive);
            }
        }

        // Drop memoized reads but leave the activity flags just written.
        let stale: Vec<String> = self
            .cache
            .keys_with_prefix(&keys::user_prefix(telegram_id))
            .into_iter()
            .filter(|key| !key.ends_with("_status"))
            .collect();
        self.cache.delete_many(&stale);

        tracing::info!(telegram_id, is_active, "user activity changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::UserService;
    use crate::cache::{ActivityFlag, KeyValueCache, keys};
    use crate::error::Error;
    use crate::repository::{MemoryRepository, Repository};
    use std::sync::Arc;
    use std::time::Duration;

    fn cache() -> KeyValueCache {
        KeyValueCache::new(1024, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn existence_reads_are_memoized() {
        let repository = Arc::new(MemoryRepository::new());
        let service = UserService::new(repository.clone(), cache());

        assert!(!service.user_exists(7).await.unwrap());
        // Cached "false" is served until creation invalidates it.
        service.create_user(7).await.unwrap();
        assert!(service.user_exists(7).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_activity_is_not_found() {
        let service = UserService::new(Arc::new(MemoryRepository::new()), cache());
        assert!(matches!(
            service.is_user_active(7).await,
            Err(Error::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn deactivation_flips_mailbox_flags_but_keeps_them_cached() {
        let repository = Arc::new(MemoryRepository::new());
        let cache = cache();
        let service = UserService::new(repository.clone(), cache.clone());

        service.create_user(7).await.unwrap();
        repository
            .create_service("Example", "imap.example.com", 993)
            .await
            .unwrap();
        let mailbox = repository
            .create_mailbox(7, 1, "me@example.com", "enc")
            .await
            .unwrap();
        cache.set_activity(7, mailbox.id, ActivityFlag::Active);
        cache.set_memoized(&keys::user_boxes(7), "[]");

        service.set_user_active(7, false).await.unwrap();

        assert_eq!(cache.activity(7, mailbox.id), Some(ActivityFlag::Inactive));
        assert!(cache.get(&keys::user_boxes(7)).is_none());
        assert!(!service.is_user_active(7).await.unwrap());
    }
}
