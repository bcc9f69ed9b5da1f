//! IMAP listener core: per-mailbox sessions and their supervisor.

mod session;
mod supervisor;

pub use session::{MailboxSession, SessionContext, check_connection};
pub use supervisor::ListenerSupervisor;
