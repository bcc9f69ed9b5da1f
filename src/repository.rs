//! Durable storage boundary.
//!
//! The core consumes persistence through the [`Repository`] trait and ships
//! an in-memory implementation. The trait is the seam a relational backend
//! would plug into; callers never see its locking.

use crate::error::{Error, Result};
use crate::models::{Mailbox, MailboxFilter, MailService, NewFilter, User};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// CRUD operations over users, mail services, mailboxes, and filters.
///
/// "Not found" conditions are reported as domain errors so the service layer
/// can pass them through without translation.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_user(&self, telegram_id: i64) -> Result<User>;
    async fn user_exists(&self, telegram_id: i64) -> Result<bool>;
    async fn get_user(&self, telegram_id: i64) -> Result<User>;
    /// Deactivating a user durably deactivates every owned mailbox.
    async fn set_user_active(&self, telegram_id: i64, is_active: bool) -> Result<()>;

    async fn create_service(&self, title: &str, host: &str, port: u16) -> Result<MailService>;
    async fn list_services(&self) -> Result<Vec<MailService>>;
    async fn get_service(&self, service_id: i64) -> Result<MailService>;
    /// Protected delete: fails with [`Error::MailServiceInUse`] while any
    /// mailbox references the service.
    async fn delete_service(&self, service_id: i64) -> Result<()>;

    async fn create_mailbox(
        &self,
        telegram_id: i64,
        service_id: i64,
        username: &str,
        encrypted_password: &str,
    ) -> Result<Mailbox>;
    async fn get_mailbox(&self, telegram_id: i64, box_id: i64) -> Result<Mailbox>;
    async fn list_user_mailboxes(&self, telegram_id: i64) -> Result<Vec<Mailbox>>;
    async fn list_all_mailboxes(&self) -> Result<Vec<Mailbox>>;
    async fn list_active_mailboxes(&self) -> Result<Vec<Mailbox>>;
    async fn set_mailbox_status(&self, telegram_id: i64, box_id: i64, is_active: bool)
    -> Result<()>;
    /// Delete a mailbox and cascade to its filters.
    async fn delete_mailbox(&self, telegram_id: i64, box_id: i64) -> Result<()>;

    async fn add_filters(&self, box_id: i64, filters: &[NewFilter]) -> Result<Vec<MailboxFilter>>;
    /// `(sender, alias)` pairs for one mailbox, in insertion order.
    async fn filter_values(&self, box_id: i64) -> Result<Vec<(String, Option<String>)>>;
}

pub type SharedRepository = Arc<dyn Repository>;

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    services: HashMap<i64, MailService>,
    mailboxes: HashMap<i64, Mailbox>,
    filters: Vec<MailboxFilter>,
    next_service_id: i64,
    next_box_id: i64,
    next_filter_id: i64,
}

/// In-memory [`Repository`] guarded by one coarse lock. Contention is low:
/// sessions read filters once per new message, everything else is
/// registration traffic.
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRepository {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, telegram_id: i64) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&telegram_id) {
            return Err(Error::UserAlreadyExists);
        }
        let user = User {
            telegram_id,
            is_active: true,
            created_at: chrono::Utc::now(),
        };
        tables.users.insert(telegram_id, user.clone());
        Ok(user)
    }

    async fn user_exists(&self, telegram_id: i64) -> Result<bool> {
        Ok(self.tables.read().await.users.contains_key(&telegram_id))
    }

    async fn get_user(&self, telegram_id: i64) -> Result<User> {
        self.tables
            .read()
            .await
            .users
            .get(&telegram_id)
            .cloned()
            .ok_or(Error::UserNotFound)
    }

    async fn set_user_active(&self, telegram_id: i64, is_active: bool) -> Result<()> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&telegram_id).ok_or(Error::UserNotFound)?;
        user.is_active = is_active;
        if !is_active {
            for mailbox in tables.mailboxes.values_mut() {
                if mailbox.telegram_id == telegram_id {
                    mailbox.is_active = false;
                }
            }
        }
        Ok(())
    }

    async fn create_service(&self, title: &str, host: &str, port: u16) -> Result<MailService> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.services.values().find(|s| s.title == title) {
            return Ok(existing.clone());
        }
        tables.next_service_id += 1;
        let service = MailService {
            id: tables.next_service_id,
            title: title.to_string(),
            host: host.to_string(),
            port,
        };
        tables.services.insert(service.id, service.clone());
        Ok(service)
    }

    async fn list_services(&self) -> Result<Vec<MailService>> {
        let tables = self.tables.read().await;
        let mut services: Vec<_> = tables.services.values().cloned().collect();
        services.sort_by_key(|service| service.id);
        Ok(services)
    }

    async fn get_service(&self, service_id: i64) -> Result<MailService> {
        self.tables
            .read()
            .await
            .services
            .get(&service_id)
            .cloned()
            .ok_or(Error::MailServiceNotFound)
    }

    async fn delete_service(&self, service_id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.services.contains_key(&service_id) {
            return Err(Error::MailServiceNotFound);
        }
        if tables.mailboxes.values().any(|b| b.service_id == service_id) {
            return Err(Error::MailServiceInUse);
        }
        tables.services.remove(&service_id);
        Ok(())
    }

    async fn create_mailbox(
        &self,
        telegram_id: i64,
        service_id: i64,
        username: &str,
        encrypted_password: &str,
    ) -> Result<Mailbox> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&telegram_id) {
            return Err(Error::UserNotFound);
        }
        if !tables.services.contains_key(&service_id) {
            return Err(Error::MailServiceNotFound);
        }
        // The (user, service, username) triple is unique.
        let duplicate = tables.mailboxes.values().any(|b| {
            b.telegram_id == telegram_id && b.service_id == service_id && b.username == username
        });
        if duplicate {
            return Err(Error::MailboxAlreadyExists);
        }

        tables.next_box_id += 1;
        let mailbox = Mailbox {
            id: tables.next_box_id,
            telegram_id,
            service_id,
            username: username.to_string(),
            encrypted_password: encrypted_password.to_string(),
            is_active: true,
        };
        tables.mailboxes.insert(mailbox.id, mailbox.clone());
        Ok(mailbox)
    }

    async fn get_mailbox(&self, telegram_id: i64, box_id: i64) -> Result<Mailbox> {
        self.tables
            .read()
            .await
            .mailboxes
            .get(&box_id)
            .filter(|b| b.telegram_id == telegram_id)
            .cloned()
            .ok_or(Error::MailboxNotFound)
    }

    async fn list_user_mailboxes(&self, telegram_id: i64) -> Result<Vec<Mailbox>> {
        let tables = self.tables.read().await;
        let mut boxes: Vec<_> = tables
            .mailboxes
            .values()
            .filter(|b| b.telegram_id == telegram_id)
            .cloned()
            .collect();
        boxes.sort_by_key(|b| b.id);
        Ok(boxes)
    }

    async fn list_all_mailboxes(&self) -> Result<Vec<Mailbox>> {
        let tables = self.tables.read().await;
        let mut boxes: Vec<_> = tables.mailboxes.values().cloned().collect();
        boxes.sort_by_key(|b| b.id);
        Ok(boxes)
    }

    async fn list_active_mailboxes(&self) -> Result<Vec<Mailbox>> {
        let boxes = self.list_all_mailboxes().await?;
        Ok(boxes.into_iter().filter(|b| b.is_active).collect())
    }

    async fn set_mailbox_status(
        &self,
        telegram_id: i64,
        box_id: i64,
        is_active: bool,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mailbox = tables
            .mailboxes
            .get_mut(&box_id)
            .filter(|b| b.telegram_id == telegram_id)
            .ok_or(Error::MailboxNotFound)?;
        mailbox.is_active = is_active;
        Ok(())
    }

    async fn delete_mailbox(&self, telegram_id: i64, box_id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .mailboxes
            .get(&box_id)
            .is_some_and(|b| b.telegram_id == telegram_id);
        if !owned {
            return Err(Error::MailboxNotFound);
        }
        tables.mailboxes.remove(&box_id);
        tables.filters.retain(|filter| filter.box_id != box_id);
        Ok(())
    }

    async fn add_filters(&self, box_id: i64, filters: &[NewFilter]) -> Result<Vec<MailboxFilter>> {
        let mut tables = self.tables.write().await;
        if !tables.mailboxes.contains_key(&box_id) {
            return Err(Error::MailboxNotFound);
        }
        let mut created = Vec::with_capacity(filters.len());
        for filter in filters {
            tables.next_filter_id += 1;
            let row = MailboxFilter {
                id: tables.next_filter_id,
                box_id,
                sender: filter.sender.clone(),
                alias: filter.alias.clone(),
            };
            tables.filters.push(row.clone());
            created.push(row);
        }
        Ok(created)
    }

    async fn filter_values(&self, box_id: i64) -> Result<Vec<(String, Option<String>)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .filters
            .iter()
            .filter(|filter| filter.box_id == box_id)
            .map(|filter| (filter.sender.clone(), filter.alias.clone()))
            .collect())
    }
}
