//! In-process key/value cache backing activity flags and read memoization.
//!
//! Two classes of entries share one store: memoized repository reads, which
//! carry the configured TTL, and per-mailbox activity flags, which never
//! expire and are only removed explicitly. Running sessions poll their flag
//! once per idle cycle, so flag reads sit on the hot path and must be cheap.

use moka::Expiry;
use moka::sync::Cache;
use std::time::{Duration, Instant};

pub const ACTIVE_VALUE: &str = "true";
pub const INACTIVE_VALUE: &str = "false";

/// Whether a mailbox session should currently be listening.
///
/// Absence of the flag is a third state: "unknown, resync from durable
/// state", which sessions treat as a stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityFlag {
    Active,
    Inactive,
}

impl ActivityFlag {
    pub fn from_active(is_active: bool) -> Self {
        if is_active { Self::Active } else { Self::Inactive }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => ACTIVE_VALUE,
            Self::Inactive => INACTIVE_VALUE,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            ACTIVE_VALUE => Some(Self::Active),
            INACTIVE_VALUE => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// Shared key/value store with per-entry timed expiry. Cloning is cheap and
/// every clone observes the same entries.
#[derive(Clone)]
pub struct KeyValueCache {
    entries: Cache<String, Entry>,
    default_ttl: Duration,
}

impl std::fmt::Debug for KeyValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl KeyValueCache {
    pub fn new(capacity: u64, default_ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            entries,
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value)
    }

    /// Store `value` under `key`. `ttl = None` keeps the entry until it is
    /// deleted or evicted by capacity pressure.
    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
            },
        );
    }

    /// Store a memoized read with the configured default TTL.
    pub fn set_memoized(&self, key: &str, value: &str) {
        self.set(key, value, Some(self.default_ttl));
    }

    pub fn delete(&self, key: &str) {
        self.entries.invalidate(key);
    }

    pub fn delete_many(&self, keys: &[String]) {
        for key in keys {
            self.entries.invalidate(key);
        }
    }

    /// List live keys starting with `prefix`. Linear scan; used by admin
    /// cleanup paths, never by sessions.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .map(|(key, _)| key.as_ref().clone())
            .filter(|key| key.starts_with(prefix))
            .collect()
    }

    pub fn activity(&self, telegram_id: i64, box_id: i64) -> Option<ActivityFlag> {
        self.get(&keys::activity(telegram_id, box_id))
            .and_then(|value| ActivityFlag::parse(&value))
    }

    /// Activity flags never expire; a session may poll its flag long after
    /// the memoization TTL would have evicted an ordinary entry.
    pub fn set_activity(&self, telegram_id: i64, box_id: i64, flag: ActivityFlag) {
        self.set(&keys::activity(telegram_id, box_id), flag.as_str(), None);
    }
}

/// Cache key builders. Shapes mirror the durable entities they memoize so
/// that mutation paths can enumerate exactly what to invalidate.
pub mod keys {
    pub fn user_exists(telegram_id: i64) -> String {
        format!("user_{telegram_id}_exist")
    }

    pub fn user_is_active(telegram_id: i64) -> String {
        format!("user_{telegram_id}_is_active")
    }

    pub fn user_boxes(telegram_id: i64) -> String {
        format!("user_{telegram_id}_boxes")
    }

    pub fn box_full(telegram_id: i64, box_id: i64) -> String {
        format!("user_{telegram_id}_box_full_{box_id}")
    }

    pub fn filter_values(telegram_id: i64, box_id: i64) -> String {
        format!("user_{telegram_id}_box_filter_values_{box_id}")
    }

    pub fn all_services() -> String {
        "services_all".to_string()
    }

    pub fn activity(telegram_id: i64, box_id: i64) -> String {
        format!("user_{telegram_id}_{box_id}_status")
    }

    /// Prefix matching every cache entry belonging to one user.
    pub fn user_prefix(telegram_id: i64) -> String {
        format!("user_{telegram_id}_")
    }

    /// Every key invalidated when one mailbox changes or disappears.
    pub fn for_box(telegram_id: i64, box_id: i64) -> Vec<String> {
        vec![
            user_boxes(telegram_id),
            box_full(telegram_id, box_id),
            filter_values(telegram_id, box_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivityFlag, KeyValueCache, keys};
    use std::time::Duration;

    fn cache() -> KeyValueCache {
        KeyValueCache::new(1024, Duration::from_secs(3600))
    }

    #[test]
    fn set_get_delete() {
        let cache = cache();
        cache.set("k", "v", None);
        assert_eq!(cache.get("k"), Some("v".to_string()));
        cache.delete("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = cache();
        cache.set("short", "v", Some(Duration::from_millis(50)));
        assert_eq!(cache.get("short"), Some("v".to_string()));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get("short"), None);
    }

    #[test]
    fn flags_outlive_memoized_entries() {
        let cache = KeyValueCache::new(1024, Duration::from_millis(50));
        cache.set_activity(7, 1, ActivityFlag::Active);
        cache.set_memoized(&keys::user_exists(7), "true");
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.activity(7, 1), Some(ActivityFlag::Active));
        assert_eq!(cache.get(&keys::user_exists(7)), None);
    }

    #[test]
    fn delete_many_removes_all() {
        let cache = cache();
        let targets = keys::for_box(7, 3);
        for key in &targets {
            cache.set(key, "v", None);
        }
        cache.delete_many(&targets);
        for key in &targets {
            assert_eq!(cache.get(key), None);
        }
    }

    #[test]
    fn prefix_scan_is_per_user() {
        let cache = cache();
        cache.set(&keys::user_boxes(7), "a", None);
        cache.set_activity(7, 1, ActivityFlag::Inactive);
        cache.set(&keys::user_boxes(8), "b", None);

        let mut found = cache.keys_with_prefix(&keys::user_prefix(7));
        found.sort();
        assert_eq!(found, vec!["user_7_1_status", "user_7_boxes"]);
    }

    #[test]
    fn unknown_flag_values_read_as_absent() {
        let cache = cache();
        cache.set(&keys::activity(7, 1), "maybe", None);
        assert_eq!(cache.activity(7, 1), None);
    }
}
