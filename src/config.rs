//! TOML configuration for the listener service.

use anyhow::Context as _;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub imap: ImapConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    pub render: RenderConfig,
    pub telegram: TelegramConfig,
    pub crypto: CryptoConfig,
    /// Mail services seeded into the catalog at startup.
    #[serde(default)]
    pub mail_services: Vec<MailServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImapConfig {
    /// Ceiling for the registration-time connection probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Passive IDLE wait window.
    #[serde(default = "default_idle_window_secs")]
    pub idle_window_secs: u64,
    /// Hard bound on any single protocol step. Must exceed the idle window
    /// so the wait always terminates first.
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,
}

impl ImapConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn idle_window(&self) -> Duration {
        Duration::from_secs(self.idle_window_secs)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs.max(self.idle_window_secs + 1))
    }
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout_secs(),
            idle_window_secs: default_idle_window_secs(),
            hard_timeout_secs: default_hard_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// HTML-to-image service endpoint.
    pub endpoint: String,
}

#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct CryptoConfig {
    /// Base64-encoded 32-byte AES key for stored passwords.
    pub key_base64: String,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("key_base64", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailServiceConfig {
    pub title: String,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let mut config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        // Secrets can be supplied via the environment instead of the file.
        if let Ok(token) = std::env::var("MAILBEACON_BOT_TOKEN") {
            config.telegram.bot_token = token;
        }
        if let Ok(key) = std::env::var("MAILBEACON_CRYPTO_KEY") {
            config.crypto.key_base64 = key;
        }
        Ok(config)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    20
}

fn default_idle_window_secs() -> u64 {
    59
}

fn default_hard_timeout_secs() -> u64 {
    60
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    3600
}
