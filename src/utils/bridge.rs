use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::core::compression::common::{FileDecision, ProgressHooks};
use crate::models::{ArchiveError, EngineConfig};
use crate::utils::progress::{ProgressSink, ProgressSnapshot, SharedProgress, SinkError};

const STOPPING_TEXT: &str = "Stopping...";

/// Runs one backend call on a worker thread and relays its progress
///
/// The caller's thread polls the shared state, copies phase text and percent
/// into a [`ProgressSink`], and turns sink cancellation into the worker's
/// `cancel_requested` flag. The worker is never interrupted; it stops at its
/// next file boundary.
#[derive(Debug, Clone)]
pub struct AsyncBridge {
    poll_interval: Duration,
    startup_delay: Duration,
    timeout: Option<Duration>,
}

impl AsyncBridge {
    pub fn new(poll_interval: Duration, startup_delay: Duration) -> Self {
        Self {
            poll_interval,
            startup_delay,
            timeout: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            startup_delay: config.startup_delay(),
            timeout: config.timeout(),
        }
    }

    /// Treat running longer than `timeout` as a cancellation request
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn the worker and return a handle for polling it
    pub fn start<T, F>(&self, phase_text: &str, work: F) -> Result<RunningOperation<T>, ArchiveError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProgressHooks) -> Result<T, ArchiveError> + Send + 'static,
    {
        let state = SharedProgress::new(phase_text);
        let worker_state = state.clone();

        let handle = thread::Builder::new()
            .name("archive-worker".to_string())
            .spawn(move || {
                let hooks = WorkerProgress {
                    state: worker_state.clone(),
                };
                let result = work(&hooks);
                worker_state.finish(result)
            })?;

        thread::sleep(self.startup_delay);

        Ok(RunningOperation {
            state,
            handle: Some(handle),
            started: Instant::now(),
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        })
    }

    /// Run `work` to completion, relaying progress to `sink`
    ///
    /// `show_percent` is false for backends that only report phase text.
    pub fn run<T, F>(
        &self,
        phase_text: &str,
        show_percent: bool,
        sink: Option<&dyn ProgressSink>,
        work: F,
    ) -> Result<T, ArchiveError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProgressHooks) -> Result<T, ArchiveError> + Send + 'static,
    {
        self.start(phase_text, work)?.wait(sink, show_percent)
    }
}

impl Default for AsyncBridge {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// A worker started by [`AsyncBridge::start`]
pub struct RunningOperation<T> {
    state: SharedProgress,
    handle: Option<JoinHandle<Option<T>>>,
    started: Instant,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl<T> RunningOperation<T> {
    /// Latest phase text and percent, for callers polling on their own cadence
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Ask the worker to stop at its next file boundary
    pub fn request_cancel(&self) {
        if self.state.request_cancel() {
            info!("cancellation requested");
        }
    }

    fn worker_exited(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn timed_out(&self) -> bool {
        self.timeout
            .map_or(false, |limit| self.started.elapsed() >= limit)
    }

    /// Poll until the worker finishes, then return its result
    ///
    /// Cancellation wins over a captured worker error.
    pub fn wait(mut self, sink: Option<&dyn ProgressSink>, show_percent: bool) -> Result<T, ArchiveError> {
        if let Some(sink) = sink {
            sink.set_allow_cancel(true);
            sink.set_percent_max(if show_percent { 100 } else { 0 });
        }

        let mut query_sink = sink.is_some();
        let mut worker_lost = false;

        loop {
            let snapshot = self.state.snapshot();
            if snapshot.finished {
                break;
            }

            let mut cancel = false;
            if let Some(sink) = sink {
                sink.set_phase_text(&snapshot.phase_text);
                if show_percent {
                    sink.set_percent(snapshot.percent);
                }

                if query_sink && !snapshot.cancel_requested {
                    match sink.check_cancelled() {
                        Ok(()) => {}
                        Err(SinkError::Cancelled) => cancel = true,
                        Err(SinkError::Detached(reason)) => {
                            warn!(%reason, "progress sink detached, treating as cancellation");
                            query_sink = false;
                            cancel = true;
                        }
                    }
                }
            }

            if !snapshot.cancel_requested && self.timed_out() {
                warn!(elapsed = ?self.started.elapsed(), "operation timed out, cancelling");
                cancel = true;
            }

            if cancel {
                self.request_cancel();
            }

            if self.worker_exited() && !self.is_finished() {
                worker_lost = true;
                break;
            }

            match sink {
                Some(sink) => sink.sleep(self.poll_interval),
                None => thread::sleep(self.poll_interval),
            }
        }

        let value = self
            .handle
            .take()
            .and_then(|handle| handle.join().ok())
            .flatten();

        if let Some(sink) = sink {
            sink.set_allow_cancel(false);
        }

        let mut state = self.state.lock();
        if state.cancel_requested {
            debug!(
                captured = state.captured_error.is_some(),
                "operation cancelled"
            );
            return Err(ArchiveError::UserCancelled);
        }
        if let Some(err) = state.captured_error.take() {
            return Err(err);
        }
        if worker_lost {
            warn!("archive worker exited without finishing");
        }
        value.ok_or_else(|| ArchiveError::backend("worker", "worker terminated unexpectedly"))
    }
}

/// Worker-side view of the shared state
struct WorkerProgress {
    state: SharedProgress,
}

impl ProgressHooks for WorkerProgress {
    fn file_started(&self, action: &str, name: &str) -> FileDecision {
        let mut state = self.state.lock();
        if state.cancel_requested {
            state.phase_text = STOPPING_TEXT.to_string();
            FileDecision::Stop
        } else {
            state.phase_text = format!("{} {}", action, name);
            FileDecision::Continue
        }
    }

    fn progress(&self, percent: u8) {
        self.state.lock().percent = percent.min(100);
    }

    fn phase(&self, text: &str) {
        self.state.lock().phase_text = text.to_string();
    }

    fn cancel_requested(&self) -> bool {
        self.state.is_cancel_requested()
    }
}
