//! Hand-off of composed summaries to a mail transport
//!
//! Delivery itself is somebody else's job; this module only defines the
//! seam ([`Mailer`]) and a thin adapter for a local `sendmail`.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How long a transport may take to accept one message
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(60);

const WAIT_POLL: Duration = Duration::from_millis(20);

/// A composed summary ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryMessage {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Errors raised by a mail transport
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("cannot run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mail transport exited with status {code:?}")]
    Rejected { code: Option<i32> },

    #[error("mail transport did not finish within {after:?}; killed")]
    TimedOut { after: Duration },

    #[error("mail transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can deliver a message
pub trait Mailer: Send + Sync {
    fn send(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;
}

/// Submits messages through a local `sendmail`-compatible program
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    program: PathBuf,
    timeout: Duration,
}

impl SendmailMailer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Kill the transport if it has not exited after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Mailer for SendmailMailer {
    fn send(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        if recipients.is_empty() {
            return Err(MailError::NoRecipients);
        }

        let mut child = Command::new(&self.program)
            .arg("-oi")
            .arg("-f")
            .arg(sender)
            .arg("--")
            .args(recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| MailError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // A transport that stops reading must not block us on a full pipe
        let message = render(sender, recipients, subject, body);
        let stdin = child.stdin.take();
        let feeder = thread::spawn(move || match stdin {
            Some(mut stdin) => stdin.write_all(message.as_bytes()),
            None => Ok(()),
        });

        let Some(status) = wait_deadline(&mut child, self.timeout)? else {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "mail transport already gone");
            }
            child.wait()?;
            return Err(MailError::TimedOut {
                after: self.timeout,
            });
        };
        let written = feeder
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("message writer panicked")));

        if !status.success() {
            return Err(MailError::Rejected {
                code: status.code(),
            });
        }
        written?;
        Ok(())
    }
}

/// Reap `child`, or give up once `limit` has passed.
fn wait_deadline(child: &mut Child, limit: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None if Instant::now() >= deadline => return Ok(None),
            None => thread::sleep(WAIT_POLL),
        }
    }
}

/// Render a minimal RFC 5322 message.
pub fn render(sender: &str, recipients: &[String], subject: &str, body: &str) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\n\n{}\n",
        sender,
        recipients.join(", "),
        subject,
        body
    )
}

/// Sender address for summaries originating on this host.
pub fn default_sender() -> String {
    let host = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("mirror@{}", host)
}
