//! In-memory mailer for assertions on dispatched summaries.

use std::sync::{Arc, Mutex};

use mirror_summary::{MailError, Mailer, SummaryMessage};

/// Records every message instead of sending it.
///
/// Clones share the same outbox, so a test can keep one and hand another to
/// the engine. [`RecordingMailer::failing`] records and then reports a
/// transport error.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SummaryMessage>>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<SummaryMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// The most recent message. Panics if nothing was sent.
    pub fn last(&self) -> SummaryMessage {
        self.sent
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("RecordingMailer::last: no message was sent")
    }
}

impl Mailer for RecordingMailer {
    fn send(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(SummaryMessage {
            sender: sender.to_string(),
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        if self.fail {
            return Err(MailError::Rejected { code: Some(75) });
        }
        Ok(())
    }
}
