//! Application services: the operations behind the boundary API.
//!
//! Services own the cache-aside reads, invalidation, and the wiring between
//! the repository, the credential vault, and the listener supervisor.

mod mailboxes;
mod users;

pub use mailboxes::{FilterView, MailboxDetails, MailboxService, MailboxSummary, ServiceView};
pub use users::UserService;
