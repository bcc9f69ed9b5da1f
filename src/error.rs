//! Domain error taxonomy shared across the service, listener, and API layers.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by repository, probe, and service operations.
///
/// Failures inside a running mailbox session are never converted into this
/// type for a caller; they are logged and fed into the session restart policy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("user does not exist")]
    UserNotFound,

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("mail service does not exist")]
    MailServiceNotFound,

    #[error("mail service is referenced by existing mailboxes")]
    MailServiceInUse,

    #[error("mailbox does not exist")]
    MailboxNotFound,

    #[error("mailbox already exists")]
    MailboxAlreadyExists,

    /// The mail server explicitly rejected the credentials.
    #[error("authentication failed, check username and password")]
    AuthFailed,

    /// The mail server answered with an alert or other negative response
    /// short of an authentication failure.
    #[error("mail server returned an error response")]
    ConnectionError,

    /// Transport-level refusal: connection refused, TLS failure, or timeout.
    #[error("mail server is unavailable, try again later")]
    ServerUnavailable,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Human-readable reason shown to the end user at the API boundary.
    /// Internal errors collapse into a generic message.
    pub fn user_message(&self) -> String {
        match self {
            Error::Other(_) => "service unavailable, try again later".to_string(),
            other => other.to_string(),
        }
    }
}
