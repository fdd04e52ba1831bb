//! Checkpoint → portable inference artifact.
//!
//! The exported artifact is the generator's tensor graph alone (the
//! discriminator only exists for training) paired with a JSON config record:
//!
//! ```json
//! {
//!   "audio":     { "sample_rate": 22050 },
//!   "model":     { "type": "vits", "quality": "medium" },
//!   "inference": { "noise_scale": 0.667, "length_scale": 1.0, "noise_w": 0.8 },
//!   "model_name": "my_voice",
//!   "language": "en",
//!   "created_at": "2026-08-06T12:00:00Z",
//!   "graph": { "input": "phonemes", "output": "mel", "dynamic_axis": "seq_len" }
//! }
//! ```
//!
//! Graph and record are only valid as a pair. Before writing, the generator
//! is rebuilt from the checkpoint weights and traced with a fixed dummy
//! input to validate the graph; a failed export leaves the checkpoint on
//! disk untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::config::{Quality, TrainingConfig};
use crate::model::Generator;
use crate::phoneme::VOCAB_SIZE;
use crate::{Error, Result};

/// Named input tensor of the exported graph.
pub const GRAPH_INPUT: &str = "phonemes";
/// Named output tensor of the exported graph.
pub const GRAPH_OUTPUT: &str = "mel";
/// The variable-length axis of the input (and, transitively, the output).
pub const DYNAMIC_AXIS: &str = "seq_len";

/// Dummy sequence length used for the validation trace.
pub const TRACE_SEQ_LEN: usize = 50;

/// File name of the checkpoint weights inside an output directory.
pub const CHECKPOINT_WEIGHTS: &str = "final_model.safetensors";
/// File name of the checkpoint's config snapshot.
pub const CHECKPOINT_CONFIG: &str = "final_model.json";

/// A persisted checkpoint: full weights plus the config snapshot.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    pub weights: PathBuf,
    pub config: PathBuf,
}

impl CheckpointPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            weights: dir.join(CHECKPOINT_WEIGHTS),
            config: dir.join(CHECKPOINT_CONFIG),
        }
    }
}

/// A portable inference artifact: generator graph plus config record.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub graph: PathBuf,
    pub config: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path, model_name: &str) -> Self {
        Self {
            graph: dir.join(format!("{model_name}.voice.safetensors")),
            config: dir.join(format!("{model_name}.voice.json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRecord {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub quality: Quality,
}

/// Fixed inference hyperparameters carried with every artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub noise_scale: f64,
    pub length_scale: f64,
    pub noise_w: f64,
}

impl Default for InferenceRecord {
    fn default() -> Self {
        Self {
            noise_scale: 0.667,
            length_scale: 1.0,
            noise_w: 0.8,
        }
    }
}

/// Named tensors and the declared variable-length axis of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    pub input: String,
    pub output: String,
    pub dynamic_axis: String,
}

impl Default for GraphRecord {
    fn default() -> Self {
        Self {
            input: GRAPH_INPUT.to_string(),
            output: GRAPH_OUTPUT.to_string(),
            dynamic_axis: DYNAMIC_AXIS.to_string(),
        }
    }
}

/// The artifact's config record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub audio: AudioRecord,
    pub model: ModelRecord,
    #[serde(default)]
    pub inference: InferenceRecord,
    pub model_name: String,
    pub language: String,
    pub created_at: String,
    #[serde(default)]
    pub graph: GraphRecord,
}

impl ConfigRecord {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Export a checkpoint into a portable artifact in `output_dir`.
///
/// Fails with [`Error::Export`] on any conversion problem; the checkpoint
/// itself is never modified or removed.
pub fn export_artifact(
    checkpoint: &CheckpointPaths,
    output_dir: &Path,
    model_name: &str,
) -> Result<ArtifactPaths> {
    let config = TrainingConfig::load(&checkpoint.config)
        .map_err(|e| Error::Export(format!("checkpoint config unreadable: {e}")))?;

    let device = Device::Cpu;
    let tensors = candle_core::safetensors::load(&checkpoint.weights, &device)
        .map_err(|e| Error::Export(format!("checkpoint weights unreadable: {e}")))?;

    // The inference graph carries the generator only.
    let graph_tensors: HashMap<String, Tensor> = tensors
        .into_iter()
        .filter(|(name, _)| name.starts_with("generator."))
        .collect();
    if graph_tensors.is_empty() {
        return Err(Error::Export(
            "checkpoint holds no generator tensors".into(),
        ));
    }

    trace_generator(&graph_tensors, &config, &device)?;

    std::fs::create_dir_all(output_dir)?;
    let paths = ArtifactPaths::in_dir(output_dir, model_name);
    candle_core::safetensors::save(&graph_tensors, &paths.graph)
        .map_err(|e| Error::Export(format!("writing graph: {e}")))?;

    let record = ConfigRecord {
        audio: AudioRecord {
            sample_rate: config.audio.sample_rate,
        },
        model: ModelRecord {
            kind: "vits".to_string(),
            quality: config.model.quality,
        },
        inference: InferenceRecord::default(),
        model_name: model_name.to_string(),
        language: config.data.language.clone(),
        created_at: now_rfc3339(),
        graph: GraphRecord::default(),
    };
    let json = serde_json::to_string_pretty(&record)?;
    std::fs::write(&paths.config, json)?;

    tracing::info!(
        graph = %paths.graph.display(),
        config = %paths.config.display(),
        "artifact exported"
    );
    Ok(paths)
}

/// Rebuild the generator from the graph tensors and run it on a fixed dummy
/// input, validating shapes before anything is written.
fn trace_generator(
    graph_tensors: &HashMap<String, Tensor>,
    config: &TrainingConfig,
    device: &Device,
) -> Result<()> {
    let vb = VarBuilder::from_tensors(graph_tensors.clone(), DType::F32, device);
    let generator = Generator::new(
        vb.pp("generator"),
        VOCAB_SIZE as usize,
        config.model.hidden_dim,
        config.audio.mel_bins,
    )
    .map_err(|e| Error::Export(format!("rebuilding generator: {e}")))?;

    let dummy = Tensor::zeros((1, TRACE_SEQ_LEN), DType::U32, device)
        .map_err(|e| Error::Export(e.to_string()))?;
    let output = generator
        .forward(&dummy)
        .map_err(|e| Error::Export(format!("trace forward failed: {e}")))?;

    let dims = output.dims();
    if dims != [1, config.audio.mel_bins, TRACE_SEQ_LEN] {
        return Err(Error::Export(format!(
            "trace produced {dims:?}, expected [1, {}, {TRACE_SEQ_LEN}]",
            config.audio.mel_bins
        )));
    }
    Ok(())
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::new())
}
