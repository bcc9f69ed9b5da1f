//! Multi-user IMAP mailbox listener service.
//!
//! Users register mail accounts with per-sender filters; the service keeps
//! one IDLE session per active mailbox, qualifies incoming mail against the
//! filters, renders matches as image cards, and delivers them over
//! Telegram. A small HTTP API drives registration and lifecycle.

pub mod api;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod listener;
pub mod models;
pub mod repository;
pub mod service;
pub mod sweep;

pub use error::{Error, Result};
