//! Reading-progress reporter: debounced, thresholded position writes.

use std::time::Instant;

use log::{debug, trace};

use crate::config::ProgressConfig;

/// Where the reader is in one archive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingPosition {
    /// Center panel index.
    pub page: usize,
    /// Container scroll offset in content pixels.
    pub offset: f32,
}

/// Accepts reading-position writes. Failures are the reporter's problem to
/// log, never the session's.
pub trait ProgressStore {
    fn write(&mut self, archive_id: u64, position: ReadingPosition) -> anyhow::Result<()>;
}

pub struct ProgressReporter<S: ProgressStore> {
    store: S,
    archive_id: u64,
    config: ProgressConfig,
    last_written: Option<ReadingPosition>,
    last_write_at: Option<Instant>,
    pending: Option<ReadingPosition>,
}

impl<S: ProgressStore> ProgressReporter<S> {
    pub fn new(store: S, archive_id: u64, config: ProgressConfig) -> Self {
        Self {
            store,
            archive_id,
            config,
            last_written: None,
            last_write_at: None,
            pending: None,
        }
    }

    /// Seed the reporter with the position the session was opened at so the
    /// first small move does not trigger a write.
    pub fn restore(&mut self, position: ReadingPosition) {
        self.last_written = Some(position);
        self.pending = None;
    }

    pub fn pending(&self) -> Option<ReadingPosition> {
        self.pending
    }

    pub fn last_written(&self) -> Option<ReadingPosition> {
        self.last_written
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record the current position; becomes pending once it is far enough
    /// from the last written one (or lands on a different page).
    pub fn observe(&mut self, position: ReadingPosition, now: Instant) {
        let moved = match self.last_written {
            None => true,
            Some(w) => {
                w.page != position.page || (w.offset - position.offset).abs() >= self.config.min_delta
            }
        };
        if moved {
            trace!(
                "progress: pending page={} offset={:.1}",
                position.page, position.offset
            );
            self.pending = Some(position);
        } else {
            self.pending = None;
        }
        self.poll(now);
    }

    /// Write the pending position once the debounce interval has passed
    /// since the last write. Returns true if a write happened.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.pending.is_none() {
            return false;
        }
        let due = self
            .last_write_at
            .is_none_or(|t| now.saturating_duration_since(t) >= self.config.debounce);
        if !due {
            return false;
        }
        self.last_write_at = Some(now);
        self.write_pending()
    }

    /// Write the pending position regardless of the debounce.
    pub fn flush(&mut self) -> bool {
        self.write_pending()
    }

    fn write_pending(&mut self) -> bool {
        let Some(position) = self.pending.take() else {
            return false;
        };
        match self.store.write(self.archive_id, position) {
            Ok(()) => {
                debug!(
                    "progress: wrote archive {} page={} offset={:.1}",
                    self.archive_id, position.page, position.offset
                );
                self.last_written = Some(position);
                true
            }
            Err(e) => {
                debug!("progress: write failed for archive {}: {e:#}", self.archive_id);
                false
            }
        }
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
