//! Durable domain entities and the validated input shapes accepted by the
//! boundary API.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const MAX_ALIAS_LEN: usize = 128;

/// Telegram-style external identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub telegram_id: i64,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Reusable mail service definition; referenced by many mailboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailService {
    pub id: i64,
    pub title: String,
    pub host: String,
    pub port: u16,
}

/// One tracked external mail account. The password is stored encrypted and
/// only decrypted for a probe or a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: i64,
    pub telegram_id: i64,
    pub service_id: i64,
    pub username: String,
    pub encrypted_password: String,
    pub is_active: bool,
}

/// Sender-address filter owned by a mailbox. Mail qualifies for forwarding
/// only when its sender address exactly matches `sender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxFilter {
    pub id: i64,
    pub box_id: i64,
    pub sender: String,
    pub alias: Option<String>,
}

/// Filter payload accepted at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFilter {
    pub sender: String,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Mailbox registration payload. The password arrives already encrypted by
/// the front-end, which shares the vault key.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMailbox {
    pub service_id: i64,
    pub username: String,
    pub encrypted_password: String,
    pub filters: Vec<NewFilter>,
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"))
}

pub fn is_valid_email(value: &str) -> bool {
    email_regex().is_match(value)
}

/// Validate filter inputs: sender must be a syntactically valid address and
/// the alias is capped at [`MAX_ALIAS_LEN`] characters.
pub fn validate_filters(filters: &[NewFilter]) -> Result<()> {
    for filter in filters {
        if !is_valid_email(&filter.sender) {
            return Err(Error::Validation(format!(
                "filter sender '{}' is not a valid email address",
                filter.sender
            )));
        }
        if let Some(alias) = &filter.alias
            && alias.chars().count() > MAX_ALIAS_LEN
        {
            return Err(Error::Validation(format!(
                "filter alias for '{}' exceeds {MAX_ALIAS_LEN} characters",
                filter.sender
            )));
        }
    }
    Ok(())
}
