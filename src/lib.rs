//! Custom text-to-speech voice training and synthesis in pure Rust.
//!
//! A candle-based pipeline that trains a small voice model from a corpus of
//! recorded audio/text pairs, exports it to a portable inference artifact,
//! and synthesizes speech from arbitrary text with layered fallbacks.
//!
//! ## Architecture
//!
//! ```text
//! metadata.csv + wav/ → Corpus Loader ──┐
//!                                        ├→ FeatureSample (mel + phoneme ids)
//! text → Phoneme Encoder ───────────────┘
//!                        ↓
//!          Voice Model (bi-LSTM generator + conv discriminator)
//!                        ↓  epoch loop, checkpointing
//!          Training Orchestrator → ModelCheckpoint (safetensors + config)
//!                        ↓
//!          Model Exporter → InferenceArtifact (generator graph + record)
//!                        ↓
//!          Inference Engine (graph → checkpoint → synthetic fallbacks)
//!                        ↓
//!          Griffin–Lim reconstruction → waveform → WAV
//! ```
//!
//! ## Modules
//!
//! - [`corpus`] — metadata parsing and audio file resolution
//! - [`audio`] — decoding, resampling, mel spectrogram, Griffin–Lim, WAV I/O
//! - [`phoneme`] — text → bounded integer token sequences
//! - [`features`] — per-sample feature extraction pipeline
//! - [`model`] — generator/discriminator pair and the training step
//! - [`training`] — session object, epoch loop, progress, checkpointing
//! - [`export`] — checkpoint → portable inference artifact
//! - [`inference`] — tiered synthesis with guaranteed audio output
//! - [`status`] — run state machine and progress snapshots

pub mod audio;
pub mod config;
pub mod corpus;
pub mod export;
pub mod features;
pub mod inference;
pub mod model;
pub mod phoneme;
pub mod status;
pub mod training;

mod error;

pub use error::{Error, Result};
