//! Per-mailbox IMAP session state machine.
//!
//! One session owns one connection and one high-water mark. The loop is:
//! connect, authenticate, select INBOX, then repeatedly IDLE until the
//! server pushes a "new mail" line, fetch everything above the high-water
//! mark, qualify the newest message against the mailbox's filters, and hand
//! qualified messages to the delivery pipeline. The session polls its
//! activity flag between cycles and logs out when it flips.

use crate::cache::{ActivityFlag, KeyValueCache, keys};
use crate::delivery::{DeliveryJob, DeliveryPipeline};
use crate::error::{Error, Result};
use crate::extract;
use crate::repository::SharedRepository;

use anyhow::Context as _;
use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response};
use async_imap::types::UnsolicitedResponse;
use futures::TryStreamExt as _;
use std::time::Duration;

type TlsStream = async_native_tls::TlsStream<tokio::net::TcpStream>;
type ImapClient = async_imap::Client<TlsStream>;
type ImapSession = async_imap::Session<TlsStream>;

/// Everything a session needs to drive one mailbox.
#[derive(Clone)]
pub struct SessionContext {
    pub box_id: i64,
    pub telegram_id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Decrypted account password, held only in memory.
    pub password: String,
    pub idle_window: Duration,
    pub hard_timeout: Duration,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("box_id", &self.box_id)
            .field("telegram_id", &self.telegram_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Probe a server: TCP connect, TLS handshake, greeting, LOGIN, LOGOUT.
///
/// Refused or timed-out connections come back as
/// [`Error::ServerUnavailable`]; rejected credentials as
/// [`Error::AuthFailed`] or [`Error::ConnectionError`] depending on the
/// server's response text.
pub async fn check_connection(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, probe(host, port, username, password)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ServerUnavailable),
    }
}

async fn probe(host: &str, port: u16, username: &str, password: &str) -> Result<()> {
    let client = connect(host, port).await?;
    let mut session = client
        .login(username, password)
        .await
        .map_err(|(error, _)| classify_login_failure(error))?;
    session.logout().await.ok();
    Ok(())
}

async fn connect(host: &str, port: u16) -> Result<ImapClient> {
    let tcp = tokio::net::TcpStream::connect((host, port))
        .await
        .map_err(classify_connect_failure)?;
    let tls_stream = async_native_tls::TlsConnector::new()
        .connect(host, tcp)
        .await
        .map_err(|error| Error::Other(anyhow::Error::new(error).context("TLS handshake failed")))?;
    let mut client = async_imap::Client::new(tls_stream);
    // Consume the server greeting before LOGIN.
    let _greeting = client
        .read_response()
        .await
        .context("failed to read server greeting")?;
    Ok(client)
}

fn classify_connect_failure(error: std::io::Error) -> Error {
    use std::io::ErrorKind;
    match error.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::TimedOut => Error::ServerUnavailable,
        _ => Error::ConnectionError,
    }
}

fn classify_login_failure(error: async_imap::error::Error) -> Error {
    use async_imap::error::Error as ImapError;
    match error {
        // Servers flag throttling and app-password requirements as ALERTs.
        ImapError::No(ref text) if text.to_ascii_uppercase().contains("ALERT") => {
            Error::ConnectionError
        }
        ImapError::No(_) => Error::AuthFailed,
        ImapError::Bad(ref text) if text.to_ascii_uppercase().contains("AUTHENTICATIONFAILED") => {
            Error::AuthFailed
        }
        ImapError::Io(_) | ImapError::ConnectionLost => Error::ServerUnavailable,
        other => Error::Other(anyhow::Error::new(other).context("login failed")),
    }
}

fn imap_error(error: async_imap::error::Error) -> Error {
    use async_imap::error::Error as ImapError;
    match error {
        ImapError::Io(_) | ImapError::ConnectionLost => Error::ServerUnavailable,
        other => Error::Other(anyhow::Error::new(other)),
    }
}

/// Recoverable failures restart the session from connect; the rest
/// terminate it.
fn is_recoverable(error: &Error) -> bool {
    !matches!(error, Error::AuthFailed | Error::ConnectionError)
}

/// First UID the next fetch should consider: `UIDNEXT - 1` when the server
/// reports one, otherwise the message count.
fn initial_high_water(uid_next: Option<u32>, exists: u32) -> u32 {
    uid_next.map_or(exists, |next| next.saturating_sub(1))
}

fn fetch_range(high_water: u32) -> String {
    format!("{}:*", high_water.saturating_add(1))
}

/// Newest `(uid, header)` strictly above the mark.
///
/// A UID range whose start exceeds the highest UID still returns the last
/// message, so the mark is re-checked here rather than trusting the range.
fn newest_above<'a>(
    high_water: u32,
    messages: impl IntoIterator<Item = (Option<u32>, Option<&'a [u8]>)>,
) -> Option<(u32, Vec<u8>)> {
    let mut newest: Option<(u32, Vec<u8>)> = None;
    for (uid, header) in messages {
        if let (Some(uid), Some(header)) = (uid, header)
            && uid > high_water
            && newest.as_ref().is_none_or(|(max, _)| uid > *max)
        {
            newest = Some((uid, header.to_vec()));
        }
    }
    newest
}

/// Non-error ways a connected session can end.
enum SessionEnd {
    Deactivated,
}

pub struct MailboxSession {
    context: SessionContext,
    cache: KeyValueCache,
    repository: SharedRepository,
    pipeline: DeliveryPipeline,
}

impl MailboxSession {
    pub fn new(
        context: SessionContext,
        cache: KeyValueCache,
        repository: SharedRepository,
        pipeline: DeliveryPipeline,
    ) -> Self {
        Self {
            context,
            cache,
            repository,
            pipeline,
        }
    }

    /// Outer restart loop. Recoverable failures restart the whole session
    /// immediately with no backoff; auth failures stop the session for good.
    pub async fn run(self) {
        let box_id = self.context.box_id;
        loop {
            if self.flag() != Some(ActivityFlag::Active) {
                tracing::info!(box_id, "activity flag cleared, listener not restarting");
                return;
            }

            match self.run_session().await {
                Ok(SessionEnd::Deactivated) => {
                    tracing::info!(box_id, "mailbox deactivated, listener stopped");
                    return;
                }
                Err(error) if is_recoverable(&error) => {
                    tracing::warn!(box_id, %error, "session failed, reconnecting");
                }
                Err(error) => {
                    tracing::error!(box_id, %error, "session failed permanently, listener stopped");
                    return;
                }
            }
        }
    }

    fn flag(&self) -> Option<ActivityFlag> {
        self.cache.activity(self.context.telegram_id, self.context.box_id)
    }

    /// One connected session: connect through logout.
    async fn run_session(&self) -> Result<SessionEnd> {
        let box_id = self.context.box_id;

        let mut session = self.bounded("connect", self.open_session()).await?;
        let mailbox = self
            .bounded("select", async {
                session.select("INBOX").await.map_err(imap_error)
            })
            .await?;
        let mut high_water = initial_high_water(mailbox.uid_next, mailbox.exists);
        tracing::info!(box_id, high_water, "listener connected");

        loop {
            // An absent flag means deactivation too: expiry without a
            // rewrite is how the sweep signals "stop".
            if self.flag() != Some(ActivityFlag::Active) {
                self.bounded("logout", async {
                    session.logout().await.map_err(imap_error)
                })
                .await
                .ok();
                return Ok(SessionEnd::Deactivated);
            }

            let (returned, mut pending_fetch) = self.idle_cycle(session).await?;
            session = returned;

            // Pushes that raced the IDLE teardown land here.
            while let Ok(unsolicited) = session.unsolicited_responses.try_recv() {
                match unsolicited {
                    UnsolicitedResponse::Exists(count) => {
                        tracing::debug!(box_id, count, "unsolicited EXISTS");
                        pending_fetch = true;
                    }
                    UnsolicitedResponse::Expunge(seq) => {
                        tracing::debug!(box_id, seq, "message removed");
                    }
                    _ => {
                        tracing::debug!(box_id, "unsolicited response ignored");
                    }
                }
            }

            if pending_fetch {
                high_water = self.fetch_new_mail(&mut session, high_water).await?;
            }
        }
    }

    async fn open_session(&self) -> Result<ImapSession> {
        let client = connect(&self.context.host, self.context.port).await?;
        client
            .login(&self.context.username, &self.context.password)
            .await
            .map_err(|(error, _)| classify_login_failure(error))
    }

    /// One IDLE window. Returns the session and whether a "new mail" push
    /// arrived.
    async fn idle_cycle(&self, session: ImapSession) -> Result<(ImapSession, bool)> {
        let box_id = self.context.box_id;
        let mut idle = session.idle();
        self.bounded("idle init", async {
            idle.init().await.map_err(imap_error)
        })
        .await?;

        let (idle_wait, _interrupt) = idle.wait_with_timeout(self.context.idle_window);
        // The hard bound guarantees the wait terminates even if the server
        // never answers the IDLE.
        let idle_response = match tokio::time::timeout(self.context.hard_timeout, idle_wait).await {
            Ok(response) => response.map_err(imap_error)?,
            Err(_) => return Err(Error::Other(anyhow::anyhow!("idle wait timed out"))),
        };

        let pending_fetch = match idle_response {
            IdleResponse::NewData(data) => match data.parsed() {
                Response::MailboxData(MailboxDatum::Exists(count)) => {
                    tracing::debug!(box_id, count = *count, "new mail push");
                    true
                }
                Response::Expunge(seq) => {
                    tracing::debug!(box_id, seq = *seq, "message removed");
                    false
                }
                Response::Fetch(seq, _) => {
                    tracing::debug!(box_id, seq = *seq, "message flags changed");
                    false
                }
                other => {
                    tracing::debug!(box_id, ?other, "push ignored");
                    false
                }
            },
            IdleResponse::Timeout | IdleResponse::ManualInterrupt => false,
        };

        let session = self
            .bounded("idle done", async { idle.done().await.map_err(imap_error) })
            .await?;
        Ok((session, pending_fetch))
    }

    /// Fetch headers above the high-water mark, qualify the newest message,
    /// and queue it for delivery if it matches a filter. Returns the new
    /// high-water mark.
    ///
    /// The mark advances for every message seen, qualified or not, so a
    /// message id is never considered twice within one session.
    async fn fetch_new_mail(&self, session: &mut ImapSession, high_water: u32) -> Result<u32> {
        let box_id = self.context.box_id;
        let range = fetch_range(high_water);

        let headers: Vec<async_imap::types::Fetch> = self
            .bounded("header fetch", async {
                let stream = session
                    .uid_fetch(&range, "(UID RFC822.HEADER)")
                    .await
                    .map_err(imap_error)?;
                stream.try_collect().await.map_err(imap_error)
            })
            .await?;

        let newest = newest_above(
            high_water,
            headers.iter().map(|fetch| (fetch.uid, fetch.header())),
        );
        let Some((uid, header)) = newest else {
            return Ok(high_water);
        };

        let filters = self.filter_values().await?;
        let Some(matched) = extract::qualify_sender(&header, &filters) else {
            tracing::debug!(box_id, uid, "sender did not match any filter");
            return Ok(uid);
        };

        let bodies: Vec<async_imap::types::Fetch> = self
            .bounded("body fetch", async {
                let stream = session
                    .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
                    .await
                    .map_err(imap_error)?;
                stream.try_collect().await.map_err(imap_error)
            })
            .await?;

        let Some(raw) = bodies.iter().find_map(|fetch| fetch.body()) else {
            tracing::warn!(box_id, uid, "body fetch returned no payload");
            return Ok(uid);
        };

        match extract::extract_message(raw) {
            Ok(message) => {
                tracing::info!(box_id, uid, sender = %matched.address, "qualified message");
                let html = extract::render_card(&matched.label, &self.context.username, &message);
                self.pipeline.submit(DeliveryJob {
                    telegram_id: self.context.telegram_id,
                    html,
                });
            }
            Err(error) => {
                tracing::warn!(box_id, uid, %error, "failed to parse message");
            }
        }

        Ok(uid)
    }

    /// Memoized `(sender, alias)` filter pairs for this mailbox.
    async fn filter_values(&self) -> Result<Vec<(String, Option<String>)>> {
        let key = keys::filter_values(self.context.telegram_id, self.context.box_id);
        if let Some(cached) = self.cache.get(&key)
            && let Ok(filters) = serde_json::from_str(&cached)
        {
            return Ok(filters);
        }

        let filters = self.repository.filter_values(self.context.box_id).await?;
        let serialized =
            serde_json::to_string(&filters).context("failed to serialize filter values")?;
        self.cache.set_memoized(&key, &serialized);
        Ok(filters)
    }

    async fn bounded<T>(
        &self,
        step: &'static str,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.context.hard_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(Error::Other(anyhow::anyhow!("{step} timed out"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        MailboxSession, SessionContext, classify_connect_failure, classify_login_failure,
        fetch_range, initial_high_water, is_recoverable, newest_above,
    };
    use crate::cache::{ActivityFlag, KeyValueCache};
    use crate::delivery::{DeliveryPipeline, HtmlRenderer, NotificationSender};
    use crate::error::{Error, Result};
    use crate::repository::MemoryRepository;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct NullRenderer;

    #[async_trait]
    impl HtmlRenderer for NullRenderer {
        async fn render(&self, _html: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct NullSender;

    #[async_trait]
    impl NotificationSender for NullSender {
        async fn deliver(&self, _image: Vec<u8>, _telegram_id: i64) -> Result<()> {
            Ok(())
        }
    }

    fn session_for(cache: KeyValueCache) -> MailboxSession {
        let context = SessionContext {
            box_id: 7,
            telegram_id: 100,
            host: "127.0.0.1".to_string(),
            port: 993,
            username: "user@example.com".to_string(),
            password: "secret".to_string(),
            idle_window: Duration::from_secs(1),
            hard_timeout: Duration::from_secs(2),
        };
        MailboxSession::new(
            context,
            cache,
            MemoryRepository::shared(),
            DeliveryPipeline::spawn(Arc::new(NullRenderer), Arc::new(NullSender)),
        )
    }

    #[test]
    fn high_water_prefers_uid_next() {
        assert_eq!(initial_high_water(Some(43), 10), 42);
        assert_eq!(initial_high_water(None, 10), 10);
        assert_eq!(initial_high_water(Some(0), 10), 0);
    }

    #[test]
    fn fetch_range_starts_above_the_mark() {
        assert_eq!(fetch_range(42), "43:*");
        assert_eq!(fetch_range(0), "1:*");
    }

    #[test]
    fn refused_connection_is_server_unavailable() {
        let error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            classify_connect_failure(error),
            Error::ServerUnavailable
        ));
    }

    #[test]
    fn rejected_login_is_auth_failure() {
        let error = async_imap::error::Error::No("[AUTHENTICATIONFAILED] Invalid credentials".to_string());
        assert!(matches!(classify_login_failure(error), Error::AuthFailed));
    }

    #[test]
    fn alert_response_is_a_connection_error() {
        let error =
            async_imap::error::Error::No("[ALERT] Application-specific password required".to_string());
        assert!(matches!(
            classify_login_failure(error),
            Error::ConnectionError
        ));
    }

    #[test]
    fn auth_failures_do_not_restart() {
        assert!(!is_recoverable(&Error::AuthFailed));
        assert!(!is_recoverable(&Error::ConnectionError));
        assert!(is_recoverable(&Error::ServerUnavailable));
        assert!(is_recoverable(&Error::Other(anyhow::anyhow!("idle wait timed out"))));
    }

    #[test]
    fn newest_message_selection_respects_the_mark() {
        let older = b"From: a@example.com\r\n\r\n".as_slice();
        let newer = b"From: b@example.com\r\n\r\n".as_slice();

        // A fetch range starting past the highest UID still echoes the last
        // message, which must not be delivered again.
        assert_eq!(newest_above(42, [(Some(42), Some(older))]), None);

        let picked = newest_above(
            40,
            [
                (Some(41), Some(older)),
                (Some(43), Some(newer)),
                (Some(42), Some(older)),
            ],
        );
        assert_eq!(picked, Some((43, newer.to_vec())));

        // Entries missing a UID or a header never qualify.
        assert_eq!(newest_above(40, [(None, Some(older)), (Some(41), None)]), None);
    }

    #[tokio::test]
    async fn listener_stops_when_flag_is_absent() {
        let cache = KeyValueCache::new(64, Duration::from_secs(60));
        let session = session_for(cache);
        tokio::time::timeout(Duration::from_secs(1), session.run())
            .await
            .expect("listener should stop without a flag");
    }

    #[tokio::test]
    async fn listener_stops_when_flag_is_inactive() {
        let cache = KeyValueCache::new(64, Duration::from_secs(60));
        cache.set_activity(100, 7, ActivityFlag::Inactive);
        let session = session_for(cache.clone());
        tokio::time::timeout(Duration::from_secs(1), session.run())
            .await
            .expect("listener should observe the cleared flag and stop");
    }

    #[tokio::test]
    async fn probe_against_refused_port_reports_unavailability() {
        // Bind then drop so the port is very likely unoccupied.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = super::check_connection(
            "127.0.0.1",
            port,
            "user@example.com",
            "secret",
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(Error::ServerUnavailable)));
    }
}
