//! Transfer progress: states, percentages and rate-limited reporting.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::media::ContentKind;

/// Percentage reported once response headers have been accepted.
pub const HEADERS_ACCEPTED_PERCENT: u8 = 10;
/// Highest percentage reported while bytes are still arriving.
pub const STREAMING_CAP_PERCENT: u8 = 95;

/// Lifecycle of one transfer. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Streaming,
    Validating,
    Completed,
    Failed,
}

impl TransferState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        match next {
            // Any live state may fail.
            Self::Failed => !self.is_terminal(),
            _ => !self.is_terminal() && next > self,
        }
    }
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub percent: u8,
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
    pub state: TransferState,
}

/// Callback for progress updates.
pub type ProgressCallback = Box<dyn Fn(TransferProgress) + Send + Sync>;

/// Streaming percentage for `received` bytes.
///
/// With a known total this is linear between 10 and 95. Without one it
/// approaches 95 asymptotically, scaled by the kind's typical size, so the
/// bar keeps moving without ever claiming to be done.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percent_for(received: u64, total: Option<u64>, kind: ContentKind) -> u8 {
    let fraction = match total {
        Some(total) if total > 0 => received as f64 / total as f64,
        _ => 1.0 - (-(received as f64) / kind.typical_size_bytes() as f64).exp(),
    };
    let span = f64::from(STREAMING_CAP_PERCENT - HEADERS_ACCEPTED_PERCENT);
    let percent = f64::from(HEADERS_ACCEPTED_PERCENT) + span * fraction.clamp(0.0, 1.0);
    (percent.floor() as u8).min(STREAMING_CAP_PERCENT)
}

/// Delivers progress to an optional callback.
///
/// Reported percentages never decrease. Streaming updates are spaced at least
/// `interval` apart; milestones (state changes) are always delivered.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: u8,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(callback: Option<ProgressCallback>, interval: Duration) -> Self {
        Self {
            callback,
            interval,
            last_emit: None,
            last_percent: 0,
        }
    }

    /// Report a state change, bypassing the rate limit.
    pub fn milestone(&mut self, progress: TransferProgress) {
        self.emit(progress);
    }

    /// Report streaming progress, subject to the rate limit.
    pub fn update(&mut self, progress: TransferProgress) {
        let due = self
            .last_emit
            .map_or(true, |at| at.elapsed() >= self.interval);
        if due && progress.percent > self.last_percent {
            self.emit(progress);
        }
    }

    /// Highest percentage reported so far.
    #[must_use]
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    fn emit(&mut self, mut progress: TransferProgress) {
        progress.percent = progress.percent.max(self.last_percent);
        self.last_percent = progress.percent;
        self.last_emit = Some(Instant::now());
        if let Some(callback) = &self.callback {
            callback(progress);
        }
    }
}
