//! Operations summaries for Mirror Manager
//!
//! Warning and error records from every worker are appended to one summary
//! log per [`SummaryGroup`]. The log is rotated when it grows past a byte
//! threshold or when the configured interval has elapsed since the last
//! rotation, whichever comes first. Each rotation mails the displaced
//! content to the group's recipients.
//!
//! # Architecture
//!
//! ```text
//!   tracing events (WARN+)
//!            |
//!      SummaryWriter  (MakeWriter, serialises access)
//!            |
//!      RotationEngine --- StateStore (last rotation, per group, on disk)
//!            |
//!         Mailer
//! ```

pub mod clock;
pub mod error;
pub mod group;
pub mod mail;
pub mod rotation;
pub mod state;
pub mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use group::SummaryGroup;
pub use mail::{MailError, Mailer, SendmailMailer, SummaryMessage};
pub use rotation::{Reasons, RotationEngine, RotationSettings};
pub use state::{RotationState, StateStore};
pub use writer::SummaryWriter;
