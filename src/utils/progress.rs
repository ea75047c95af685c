use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use crate::models::ArchiveError;

/// Why a progress sink refused a cancellation query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The user asked to stop
    #[error("Cancellation requested")]
    Cancelled,

    /// The sink can no longer be queried (e.g. its window was closed)
    #[error("Progress sink unavailable: {0}")]
    Detached(String),
}

/// Progress display driven by the caller's thread
///
/// The bridge is the only caller; it never hands the sink to the worker,
/// so implementations do not need to be `Send`.
pub trait ProgressSink {
    fn set_phase_text(&self, text: &str);

    /// Percent in `0..=100`
    fn set_percent(&self, percent: u8);

    /// `0` hides the percent display
    fn set_percent_max(&self, max: u8);

    fn set_allow_cancel(&self, allow: bool);

    /// Fails with [`SinkError::Cancelled`] once the user asked to stop
    fn check_cancelled(&self) -> Result<(), SinkError>;

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// State shared between the worker and the polling loop
#[derive(Debug, Default)]
pub struct ProgressState {
    pub finished: bool,
    pub percent: u8,
    pub phase_text: String,
    pub cancel_requested: bool,
    pub captured_error: Option<ArchiveError>,
}

/// Point-in-time copy of [`ProgressState`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub finished: bool,
    pub percent: u8,
    pub phase_text: String,
    pub cancel_requested: bool,
    pub failed: bool,
}

/// Mutex-guarded [`ProgressState`] handle; every field access holds the lock
#[derive(Debug, Clone)]
pub struct SharedProgress {
    inner: Arc<Mutex<ProgressState>>,
}

impl SharedProgress {
    pub fn new(phase_text: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressState {
                phase_text: phase_text.into(),
                ..ProgressState::default()
            })),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            finished: state.finished,
            percent: state.percent,
            phase_text: state.phase_text.clone(),
            cancel_requested: state.cancel_requested,
            failed: state.captured_error.is_some(),
        }
    }

    /// Set the cancellation flag. Returns true if this call flipped it.
    pub fn request_cancel(&self) -> bool {
        let mut state = self.lock();
        if state.cancel_requested {
            false
        } else {
            state.cancel_requested = true;
            true
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    /// Record the worker outcome and mark it finished.
    ///
    /// Must be the worker's last access to the state.
    pub fn finish<T>(&self, result: Result<T, ArchiveError>) -> Option<T> {
        let mut state = self.lock();
        debug_assert!(!state.finished, "operation finished twice");
        state.finished = true;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                state.captured_error = Some(e);
                None
            }
        }
    }
}
