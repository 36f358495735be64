//! `tracing-subscriber` sink backed by a [`RotationEngine`]
//!
//! The fmt layer formats each event into one buffer and hands it to the
//! writer in a single `write` call, so every call here is one record. All
//! callers share one engine behind a mutex.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

use crate::mail::SummaryMessage;
use crate::rotation::RotationEngine;
use crate::Result;

/// Cloneable handle to a shared [`RotationEngine`]
#[derive(Clone)]
pub struct SummaryWriter {
    engine: Arc<Mutex<RotationEngine>>,
}

impl SummaryWriter {
    pub fn new(engine: RotationEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// See [`RotationEngine::rotate_if_due`].
    pub fn rotate_if_due(&self) -> Result<Option<SummaryMessage>> {
        self.lock().rotate_if_due()
    }

    /// See [`RotationEngine::force_rotate`].
    pub fn force_rotate(&self) -> Result<SummaryMessage> {
        self.lock().force_rotate()
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with_engine<T>(&self, f: impl FnOnce(&mut RotationEngine) -> T) -> T {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, RotationEngine> {
        // A panic mid-record leaves nothing half-updated that matters here
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-event writer produced by [`SummaryWriter`]
pub struct RecordWriter<'a> {
    owner: &'a SummaryWriter,
}

impl io::Write for RecordWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.owner
            .lock()
            .write_record(buf)
            .map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SummaryWriter {
    type Writer = RecordWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RecordWriter { owner: self }
    }
}
