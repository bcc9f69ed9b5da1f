//! Mail service catalog, mailbox registration, and listener lifecycle.

use crate::cache::{ActivityFlag, KeyValueCache, keys};
use crate::config::{ImapConfig, MailServiceConfig};
use crate::crypto::Vault;
use crate::delivery::DeliveryPipeline;
use crate::error::{Error, Result};
use crate::listener::{ListenerSupervisor, MailboxSession, SessionContext, check_connection};
use crate::models::{self, Mailbox, MailService, NewMailbox};
use crate::repository::SharedRepository;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Catalog entry exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceView {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxSummary {
    pub id: i64,
    pub service: String,
    pub username: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterView {
    pub sender: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxDetails {
    pub id: i64,
    pub service: String,
    pub username: String,
    pub is_active: bool,
    pub filters: Vec<FilterView>,
}

#[derive(Clone)]
pub struct MailboxService {
    repository: SharedRepository,
    cache: KeyValueCache,
    vault: Arc<Vault>,
    supervisor: Arc<ListenerSupervisor>,
    pipeline: DeliveryPipeline,
    imap: ImapConfig,
}

impl MailboxService {
    pub fn new(
        repository: SharedRepository,
        cache: KeyValueCache,
        vault: Arc<Vault>,
        supervisor: Arc<ListenerSupervisor>,
        pipeline: DeliveryPipeline,
        imap: ImapConfig,
    ) -> Self {
        Self {
            repository,
            cache,
            vault,
            supervisor,
            pipeline,
            imap,
        }
    }

    /// Upsert the configured mail services into the catalog at startup.
    pub async fn seed_services(&self, services: &[MailServiceConfig]) -> Result<()> {
        for service in services {
            self.repository
                .create_service(&service.title, &service.host, service.port)
                .await?;
        }
        self.cache.delete(&keys::all_services());
        tracing::info!(count = services.len(), "mail service catalog seeded");
        Ok(())
    }

    pub async fn list_services(&self) -> Result<Vec<ServiceView>> {
        let key = keys::all_services();
        if let Some(cached) = self.cache.get(&key)
            && let Ok(services) = serde_json::from_str(&cached)
        {
            return Ok(services);
        }

        let services: Vec<ServiceView> = self
            .repository
            .list_services()
            .await?
            .into_iter()
            .map(|service| ServiceView {
                id: service.id,
                title: service.title,
            })
            .collect();
        self.memoize(&key, &services)?;
        Ok(services)
    }

    /// Remove a catalog entry. Fails while any mailbox references it.
    pub async fn delete_service(&self, service_id: i64) -> Result<()> {
        self.repository.delete_service(service_id).await?;
        self.cache.delete(&keys::all_services());
        tracing::info!(service_id, "mail service deleted");
        Ok(())
    }

    /// Register a mailbox: validate filters, probe the account with the
    /// decrypted credentials, persist, then flag it active and start its
    /// listener.
    pub async fn create_mailbox(
        &self,
        telegram_id: i64,
        new_mailbox: NewMailbox,
    ) -> Result<MailboxDetails> {
        if new_mailbox.filters.is_empty() {
            return Err(Error::Validation(
                "a mailbox needs at least one sender filter".to_string(),
            ));
        }
        models::validate_filters(&new_mailbox.filters)?;
        if !models::is_valid_email(&new_mailbox.username) {
            return Err(Error::Validation(format!(
                "'{}' is not a valid email address",
                new_mailbox.username
            )));
        }

        self.repository.get_user(telegram_id).await?;
        let service = self.repository.get_service(new_mailbox.service_id).await?;

        let password = self.vault.decrypt(&new_mailbox.encrypted_password)?;
        check_connection(
            &service.host,
            service.port,
            &new_mailbox.username,
            &password,
            self.imap.probe_timeout(),
        )
        .await?;

        let mailbox = self
            .repository
            .create_mailbox(
                telegram_id,
                service.id,
                &new_mailbox.username,
                &new_mailbox.encrypted_password,
            )
            .await?;
        let filters = self
            .repository
            .add_filters(mailbox.id, &new_mailbox.filters)
            .await?;

        self.cache
            .set_activity(telegram_id, mailbox.id, ActivityFlag::Active);
        self.cache.delete_many(&keys::for_box(telegram_id, mailbox.id));
        self.spawn_listener(&mailbox, &service, password).await;

        tracing::info!(telegram_id, box_id = mailbox.id, "mailbox registered");
        Ok(MailboxDetails {
            id: mailbox.id,
            service: service.title,
            username: mailbox.username,
            is_active: mailbox.is_active,
            filters: filters
                .into_iter()
                .map(|filter| FilterView {
                    sender: filter.sender,
                    alias: filter.alias,
                })
                .collect(),
        })
    }

    pub async fn list_mailboxes(&self, telegram_id: i64) -> Result<Vec<MailboxSummary>> {
        self.repository.get_user(telegram_id).await?;

        let key = keys::user_boxes(telegram_id);
        if let Some(cached) = self.cache.get(&key)
            && let Ok(summaries) = serde_json::from_str(&cached)
        {
            return Ok(summaries);
        }

        let mut summaries = Vec::new();
        for mailbox in self.repository.list_user_mailboxes(telegram_id).await? {
            let service = self.repository.get_service(mailbox.service_id).await?;
            summaries.push(MailboxSummary {
                id: mailbox.id,
                service: service.title,
                username: mailbox.username,
                is_active: mailbox.is_active,
            });
        }
        self.memoize(&key, &summaries)?;
        Ok(summaries)
    }

    pub async fn get_mailbox(&self, telegram_id: i64, box_id: i64) -> Result<MailboxDetails> {
        let key = keys::box_full(telegram_id, box_id);
        if let Some(cached) = self.cache.get(&key)
            && let Ok(details) = serde_json::from_str(&cached)
        {
            return Ok(details);
        }

        let mailbox = self.repository.get_mailbox(telegram_id, box_id).await?;
        let service = self.repository.get_service(mailbox.service_id).await?;
        let filters = self
            .repository
            .filter_values(box_id)
            .await?
            .into_iter()
            .map(|(sender, alias)| FilterView { sender, alias })
            .collect();

        let details = MailboxDetails {
            id: mailbox.id,
            service: service.title,
            username: mailbox.username,
            is_active: mailbox.is_active,
            filters,
        };
        self.memoize(&key, &details)?;
        Ok(details)
    }

    /// Activate or deactivate a mailbox.
    ///
    /// Activation re-probes the account first and restarts the listener.
    /// Deactivation only flips the flag; the running session observes it
    /// and logs out within one wait cycle.
    pub async fn set_mailbox_status(
        &self,
        telegram_id: i64,
        box_id: i64,
        is_active: bool,
    ) -> Result<()> {
        let mailbox = self.repository.get_mailbox(telegram_id, box_id).await?;

        if is_active {
            let service = self.repository.get_service(mailbox.service_id).await?;
            let password = self.vault.decrypt(&mailbox.encrypted_password)?;
            check_connection(
                &service.host,
                service.port,
                &mailbox.username,
                &password,
                self.imap.probe_timeout(),
            )
            .await?;

            self.repository
                .set_mailbox_status(telegram_id, box_id, true)
                .await?;
            self.cache
                .set_activity(telegram_id, box_id, ActivityFlag::Active);
            self.spawn_listener(&mailbox, &service, password).await;
        } else {
            self.repository
                .set_mailbox_status(telegram_id, box_id, false)
                .await?;
            self.cache
                .set_activity(telegram_id, box_id, ActivityFlag::Inactive);
        }

        self.cache.delete_many(&keys::for_box(telegram_id, box_id));
        tracing::info!(telegram_id, box_id, is_active, "mailbox status changed");
        Ok(())
    }

    /// Delete a mailbox, its filters, and every cache entry it owns. The
    /// removed activity flag reads as inactive to a running session.
    pub async fn delete_mailbox(&self, telegram_id: i64, box_id: i64) -> Result<()> {
        self.repository.delete_mailbox(telegram_id, box_id).await?;

        let mut stale = keys::for_box(telegram_id, box_id);
        stale.push(keys::activity(telegram_id, box_id));
        self.cache.delete_many(&stale);

        tracing::info!(telegram_id, box_id, "mailbox deleted");
        Ok(())
    }

    /// Start listeners for every durably-active mailbox. Run once at boot;
    /// unreachable accounts are skipped with a warning and picked up again
    /// by a later activation or restart.
    pub async fn start_active_listeners(&self) -> Result<()> {
        let mailboxes = self.repository.list_active_mailboxes().await?;
        let total = mailboxes.len();
        let mut started = 0usize;

        for mailbox in mailboxes {
            let user = self.repository.get_user(mailbox.telegram_id).await?;
            if !user.is_active {
                continue;
            }
            let service = self.repository.get_service(mailbox.service_id).await?;
            let password = match self.vault.decrypt(&mailbox.encrypted_password) {
                Ok(password) => password,
                Err(error) => {
                    tracing::warn!(box_id = mailbox.id, %error, "cannot decrypt stored password, skipping");
                    continue;
                }
            };

            if let Err(error) = check_connection(
                &service.host,
                service.port,
                &mailbox.username,
                &password,
                self.imap.probe_timeout(),
            )
            .await
            {
                tracing::warn!(box_id = mailbox.id, %error, "startup probe failed, skipping");
                continue;
            }

            self.cache
                .set_activity(mailbox.telegram_id, mailbox.id, ActivityFlag::Active);
            self.spawn_listener(&mailbox, &service, password).await;
            started += 1;
        }

        tracing::info!(started, total, "startup listeners launched");
        Ok(())
    }

    async fn spawn_listener(&self, mailbox: &Mailbox, service: &MailService, password: String) {
        let context = SessionContext {
            box_id: mailbox.id,
            telegram_id: mailbox.telegram_id,
            host: service.host.clone(),
            port: service.port,
            username: mailbox.username.clone(),
            password,
            idle_window: self.imap.idle_window(),
            hard_timeout: self.imap.hard_timeout(),
        };
        let session = MailboxSession::new(
            context,
            self.cache.clone(),
            Arc::clone(&self.repository),
            self.pipeline.clone(),
        );
        self.supervisor.start(mailbox.id, session.run()).await;
    }

    fn memoize<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let serialized = serde_json::to_string(value).context("failed to serialize projection")?;
        self.cache.set_memoized(key, &serialized);
        Ok(())
    }
}
