//! Training run state and progress reporting.
//!
//! The orchestrator owns a [`StatusHandle`] and is the only writer; external
//! pollers call [`StatusHandle::snapshot`] and receive an immutable
//! [`TrainingStatus`] clone. Progress is monotonic non-decreasing while the
//! run is active and maps into fixed bands of the overall pipeline:
//! preprocessing 0–40, training 40–90, export 90–100.
//!
//! At most one run may be active process-wide; [`RunGuard::acquire`] enforces
//! this with an atomic gate released on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Progress value at which the training band starts.
pub const TRAINING_BAND_START: u8 = 40;
/// Progress value at which the export band starts.
pub const TRAINING_BAND_END: u8 = 90;

/// Training run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }
}

/// Immutable snapshot of a training run's progress.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingStatus {
    pub state: RunState,
    pub is_running: bool,
    pub model_name: String,
    pub current_step: String,
    /// 0–100, monotonic non-decreasing while running.
    pub progress: u8,
    pub completed_samples: usize,
    pub total_samples: usize,
    pub errors: Vec<String>,
    pub last_loss: Option<f32>,
}

impl Default for TrainingStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            is_running: false,
            model_name: String::new(),
            current_step: String::new(),
            progress: 0,
            completed_samples: 0,
            total_samples: 0,
            errors: Vec::new(),
            last_loss: None,
        }
    }
}

/// Shared handle to a run's status. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<TrainingStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> TrainingStatus {
        self.lock().clone()
    }

    /// Reset the status for a fresh run and mark it running.
    pub fn begin(&self, model_name: &str) {
        let mut status = self.lock();
        *status = TrainingStatus {
            state: RunState::Running,
            is_running: true,
            model_name: model_name.to_string(),
            current_step: "Starting preprocessing".to_string(),
            ..TrainingStatus::default()
        };
    }

    /// Update the step label and progress. Progress below the current value
    /// is clamped so the reported percentage never moves backwards while the
    /// run is active.
    pub fn update(&self, step: &str, progress: u8) {
        let mut status = self.lock();
        status.current_step = step.to_string();
        if status.is_running {
            status.progress = status.progress.max(progress.min(100));
        } else {
            status.progress = progress.min(100);
        }
        tracing::info!(progress = status.progress, "{step}");
    }

    /// Record a non-fatal per-sample error.
    pub fn push_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.lock().errors.push(message);
    }

    pub fn set_sample_counts(&self, completed: usize, total: usize) {
        let mut status = self.lock();
        status.completed_samples = completed;
        status.total_samples = total;
    }

    pub fn set_last_loss(&self, loss: f32) {
        self.lock().last_loss = Some(loss);
    }

    /// Transition to a terminal state and freeze the snapshot.
    pub fn finish(&self, state: RunState) {
        let mut status = self.lock();
        status.state = state;
        status.is_running = false;
        if state == RunState::Failed {
            status.progress = 0;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrainingStatus> {
        // A poisoned lock only means a writer panicked mid-update; the
        // partially updated snapshot is still valid to read.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Progress callback contract: `(step_label, percent)`. Consumers must be
/// idempotent to repeated calls with the same values.
pub type ProgressFn = dyn Fn(&str, u8) + Send + Sync;

/// Map an epoch index (1-based) into the 40–90 training band.
pub fn training_progress(epoch: usize, max_epochs: usize) -> u8 {
    let band = (TRAINING_BAND_END - TRAINING_BAND_START) as usize;
    let offset = epoch * band / max_epochs.max(1);
    TRAINING_BAND_START + offset.min(band) as u8
}

static RUN_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Process-wide exclusivity gate for training runs.
///
/// Held for the duration of a run; dropping it releases the slot.
#[derive(Debug)]
pub struct RunGuard(());

impl RunGuard {
    /// Claim the run slot, or fail if another run is active. A rejected
    /// claim does not touch the active run's state in any way.
    pub fn acquire() -> crate::Result<Self> {
        if RUN_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(RunGuard(()))
        } else {
            Err(crate::Error::AlreadyRunning)
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        RUN_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Serializes tests that claim the process-wide run slot.
#[cfg(test)]
pub(crate) fn run_slot_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::OnceLock;
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// Cooperative cancellation flag checked between batches and epochs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The orchestrator finishes the current batch,
    /// persists the checkpoint, and ends in [`RunState::Cancelled`].
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic_while_running() {
        let handle = StatusHandle::new();
        handle.begin("test");
        handle.update("step one", 30);
        handle.update("late report", 10);
        let snap = handle.snapshot();
        assert_eq!(snap.progress, 30);
        assert_eq!(snap.current_step, "late report");
    }

    #[test]
    fn begin_resets_previous_run() {
        let handle = StatusHandle::new();
        handle.begin("first");
        handle.push_error("sample x failed");
        handle.update("almost done", 95);
        handle.finish(RunState::Completed);

        handle.begin("second");
        let snap = handle.snapshot();
        assert_eq!(snap.model_name, "second");
        assert_eq!(snap.progress, 0);
        assert!(snap.errors.is_empty());
        assert!(snap.is_running);
    }

    #[test]
    fn failed_resets_progress_and_clears_running() {
        let handle = StatusHandle::new();
        handle.begin("run");
        handle.update("training", 60);
        handle.push_error("boom");
        handle.finish(RunState::Failed);
        let snap = handle.snapshot();
        assert_eq!(snap.state, RunState::Failed);
        assert!(!snap.is_running);
        assert_eq!(snap.progress, 0);
        assert_eq!(snap.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn snapshot_is_detached() {
        let handle = StatusHandle::new();
        handle.begin("run");
        let before = handle.snapshot();
        handle.update("later", 50);
        assert_eq!(before.progress, 0);
        assert_eq!(handle.snapshot().progress, 50);
    }

    #[test]
    fn training_band_endpoints() {
        assert_eq!(training_progress(0, 100), 40);
        assert_eq!(training_progress(50, 100), 65);
        assert_eq!(training_progress(100, 100), 90);
        // Epoch overshoot stays inside the band.
        assert_eq!(training_progress(150, 100), 90);
    }

    #[test]
    fn run_guard_is_exclusive() {
        let _serial = run_slot_test_lock();
        let guard = RunGuard::acquire().unwrap();
        assert!(matches!(
            RunGuard::acquire(),
            Err(crate::Error::AlreadyRunning)
        ));
        drop(guard);
        let again = RunGuard::acquire().unwrap();
        drop(again);
    }

    #[test]
    fn cancel_token_roundtrip() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
