//! Training orchestration: the session object, epoch loop, checkpointing.
//!
//! A [`TrainingSession`] owns the run's status handle and cancellation
//! token. [`TrainingSession::run`] is blocking and drives the whole
//! pipeline — corpus load, feature extraction, the epoch/batch loop, the
//! checkpoint write, and artifact export — updating progress through the
//! fixed bands (preprocessing 0–40, training 40–90, export 90–100).
//! [`TrainingSession::spawn`] moves the same blocking loop onto a dedicated
//! worker thread so a calling layer can keep polling snapshots.
//!
//! State machine: `idle → running → {completed | failed | cancelled}`.
//! Starting while another run is active anywhere in the process is rejected
//! up front. Any error inside the loop transitions the run to `failed`
//! (progress reset, message recorded, `is_running` cleared); there is no
//! automatic retry. A cancelled run still persists its checkpoint.

use std::path::PathBuf;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::seq::SliceRandom;

use crate::audio::DB_FLOOR;
use crate::config::TrainingConfig;
use crate::corpus::load_corpus;
use crate::export::{export_artifact, ArtifactPaths, CheckpointPaths};
use crate::features::{FeatureExtractor, FeatureSample};
use crate::model::VoiceModel;
use crate::phoneme::PAD_ID;
use crate::status::{
    training_progress, CancelToken, ProgressFn, RunGuard, RunState, StatusHandle,
};
use crate::{Error, Result};

/// Progress callbacks fire every this many optimizer steps.
const PROGRESS_EVERY_STEPS: usize = 10;

/// Name of the config snapshot written during preprocessing.
const RUN_CONFIG_FILE: &str = "config.json";

/// Result of a finished (or cancelled) training run.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub state: RunState,
    pub checkpoint: CheckpointPaths,
    /// Present only when export ran and succeeded.
    pub artifact: Option<ArtifactPaths>,
    pub trained_samples: usize,
}

/// A configured training run. Construct, optionally attach a progress
/// callback, then call [`run`](Self::run) or [`spawn`](Self::spawn).
pub struct TrainingSession {
    model_name: String,
    corpus_dir: PathBuf,
    output_dir: PathBuf,
    config: TrainingConfig,
    status: StatusHandle,
    cancel: CancelToken,
    progress: Option<Arc<ProgressFn>>,
}

impl TrainingSession {
    pub fn new(
        model_name: impl Into<String>,
        corpus_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            corpus_dir: corpus_dir.into(),
            output_dir: output_dir.into(),
            config,
            status: StatusHandle::new(),
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Attach a progress callback `(step_label, percent)`. The callback may
    /// see repeated values and must be idempotent.
    pub fn with_progress(mut self, callback: impl Fn(&str, u8) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Handle for polling status snapshots, shared with the run.
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Token for cooperative cancellation, checked between batches.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the whole pipeline on the calling thread.
    pub fn run(&self) -> Result<TrainingOutcome> {
        // Claim the process-wide slot first; a rejected start must not
        // touch any other run's state (or even this session's status).
        let _guard = RunGuard::acquire()?;

        self.config.validate()?;
        self.status.begin(&self.model_name);

        match self.run_pipeline() {
            Ok(outcome) => {
                self.status.finish(outcome.state);
                Ok(outcome)
            }
            Err(error) => {
                self.status.push_error(error.to_string());
                self.status.finish(RunState::Failed);
                Err(error)
            }
        }
    }

    /// Run on a dedicated worker thread, returning a handle immediately.
    pub fn spawn(self) -> RunningSession {
        let status = self.status();
        let cancel = self.cancel_token();
        let handle = std::thread::spawn(move || self.run());
        RunningSession {
            status,
            cancel,
            handle,
        }
    }

    fn report(&self, step: &str, progress: u8) {
        self.status.update(step, progress);
        if let Some(callback) = &self.progress {
            // Hand the callback the clamped value so consumers see the same
            // monotonic sequence that pollers do.
            callback(step, self.status.snapshot().progress);
        }
    }

    fn run_pipeline(&self) -> Result<TrainingOutcome> {
        std::fs::create_dir_all(&self.output_dir)?;

        // --- Preprocessing band: 0–40 ---
        self.report("Running dataset preprocessing", 10);
        let corpus = load_corpus(&self.corpus_dir)?;
        for skip in &corpus.skipped {
            self.status
                .push_error(format!("record {}: {}", skip.sample_id, skip.reason));
        }
        self.report(&format!("Found {} audio files", corpus.len()), 20);

        let extractor = FeatureExtractor::new(&self.config);
        let features = extractor.extract_all(&corpus.records, &self.status);
        if features.is_empty() {
            return Err(Error::Corpus(
                "no usable samples survived preprocessing".into(),
            ));
        }
        self.config.save(self.output_dir.join(RUN_CONFIG_FILE))?;
        self.report("Preprocessing complete", 30);

        // --- Training band: 40–90 ---
        self.report("Starting neural model training", 40);
        let (checkpoint, cancelled) = self.train_loop(&features)?;

        if cancelled {
            self.report("Training cancelled, checkpoint saved", 0);
            return Ok(TrainingOutcome {
                state: RunState::Cancelled,
                checkpoint,
                artifact: None,
                trained_samples: features.len(),
            });
        }

        // --- Export band: 90–100 ---
        self.report("Training complete, exporting model", 90);
        let artifact = export_artifact(&checkpoint, &self.output_dir, &self.model_name)?;
        self.report("Model exported successfully", 100);

        Ok(TrainingOutcome {
            state: RunState::Completed,
            checkpoint,
            artifact: Some(artifact),
            trained_samples: features.len(),
        })
    }

    /// The epoch/batch loop. Returns the persisted checkpoint and whether
    /// the run was cancelled before completing every epoch.
    fn train_loop(&self, features: &[FeatureSample]) -> Result<(CheckpointPaths, bool)> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = VoiceModel::new(vb, &self.config)?;
        let mut optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: self.config.training.learning_rate,
                ..Default::default()
            },
        )?;

        let max_epochs = self.config.training.max_epochs;
        let batch_size = self.config.training.batch_size;
        let mut rng = rand::thread_rng();
        let mut step_count = 0usize;
        let mut cancelled = false;

        'epochs: for epoch in 1..=max_epochs {
            let mut order: Vec<usize> = (0..features.len()).collect();
            order.shuffle(&mut rng);

            for chunk in order.chunks(batch_size) {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'epochs;
                }

                let (phonemes, target_mel) = batch_tensors(features, chunk, &device)?;
                let (loss, metrics) = model.training_step(&phonemes, &target_mel)?;
                optimizer.backward_step(&loss)?;

                step_count += 1;
                if step_count % PROGRESS_EVERY_STEPS == 0 {
                    self.status.set_last_loss(metrics.total_loss);
                    self.report(
                        &format!("Training - epoch {epoch}/{max_epochs}"),
                        training_progress(epoch, max_epochs),
                    );
                }
            }

            self.report(
                &format!("Training - epoch {epoch}/{max_epochs}"),
                training_progress(epoch, max_epochs),
            );
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        // Persisted at the end of the final epoch (or on cancel) regardless
        // of the loss trend: no early stopping, no best-checkpoint pick.
        let checkpoint = CheckpointPaths::in_dir(&self.output_dir);
        varmap
            .save(&checkpoint.weights)
            .map_err(|e| Error::Training(format!("saving checkpoint: {e}")))?;
        self.config.save(&checkpoint.config)?;
        tracing::info!(path = %checkpoint.weights.display(), "checkpoint saved");

        Ok((checkpoint, cancelled))
    }
}

/// Handle to a session running on its worker thread.
pub struct RunningSession {
    status: StatusHandle,
    cancel: CancelToken,
    handle: std::thread::JoinHandle<Result<TrainingOutcome>>,
}

impl RunningSession {
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the run finishes.
    pub fn join(self) -> Result<TrainingOutcome> {
        self.handle
            .join()
            .map_err(|_| Error::Training("training thread panicked".into()))?
    }
}

/// Stack a batch of variable-length samples into padded tensors.
///
/// Phoneme rows are padded with the pad id, mel rows with the dB floor, to
/// the longest sample in the batch. The training step's truncation policy
/// bounds every loss computation to real frames of the shortest side.
fn batch_tensors(
    features: &[FeatureSample],
    indices: &[usize],
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let batch = indices.len();
    let max_tokens = indices
        .iter()
        .map(|&i| features[i].phoneme_ids.len())
        .max()
        .unwrap_or(1)
        .max(1);
    let mel_bins = features[indices[0]].mel.len();
    let max_frames = indices
        .iter()
        .map(|&i| features[i].mel[0].len())
        .max()
        .unwrap_or(1)
        .max(1);

    let mut tokens = Vec::with_capacity(batch * max_tokens);
    let mut mels = Vec::with_capacity(batch * mel_bins * max_frames);

    for &i in indices {
        let sample = &features[i];
        tokens.extend(sample.phoneme_ids.iter().copied());
        tokens.extend(std::iter::repeat(PAD_ID).take(max_tokens - sample.phoneme_ids.len()));

        for row in &sample.mel {
            mels.extend(row.iter().copied());
            mels.extend(std::iter::repeat(DB_FLOOR).take(max_frames - row.len()));
        }
    }

    let phonemes = Tensor::from_vec(tokens, (batch, max_tokens), device)?;
    let target_mel = Tensor::from_vec(mels, (batch, mel_bins, max_frames), device)?;
    Ok((phonemes, target_mel))
}
