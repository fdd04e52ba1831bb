//! Training configuration.
//!
//! Mirrors the on-disk `config.json` layout consumed by the pipeline:
//!
//! ```json
//! {
//!   "audio":    { "sample_rate": 22050, "mel_bins": 80 },
//!   "model":    { "quality": "medium", "hidden_dim": 256, "num_layers": 2 },
//!   "training": { "batch_size": 8, "learning_rate": 1e-4, "max_epochs": 100 },
//!   "data":     { "language": "en", "single_speaker": true, "num_speakers": 1 }
//! }
//! ```
//!
//! A config is immutable once a training run starts: the orchestrator takes
//! it by value and snapshots it next to the checkpoint.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Discrete training-effort tier, mapping to an epoch count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    /// Epoch count for this tier.
    pub fn max_epochs(self) -> usize {
        match self {
            Quality::Low => 50,
            Quality::Medium => 100,
            Quality::High => 200,
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(crate::Error::Config(format!(
                "unknown quality tier '{other}' (expected low, medium, or high)"
            ))),
        }
    }
}

/// Audio front-end parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Target sample rate; corpus audio is resampled to this.
    pub sample_rate: u32,
    /// Mel filterbank size.
    #[serde(default = "default_mel_bins")]
    pub mel_bins: usize,
}

/// Model topology parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub quality: Quality,
    pub hidden_dim: usize,
    pub num_layers: usize,
}

/// Training loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub max_epochs: usize,
}

/// Dataset parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub language: String,
    pub single_speaker: bool,
    pub num_speakers: usize,
}

/// Top-level training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub audio: AudioConfig,
    pub model: ModelConfig,
    pub training: TrainingParams,
    pub data: DataConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig {
                sample_rate: 22050,
                mel_bins: default_mel_bins(),
            },
            model: ModelConfig {
                quality: Quality::Medium,
                hidden_dim: 256,
                num_layers: 2,
            },
            training: TrainingParams {
                batch_size: 8,
                learning_rate: 1e-4,
                max_epochs: Quality::Medium.max_epochs(),
            },
            data: DataConfig {
                language: "en".to_string(),
                single_speaker: true,
                num_speakers: 1,
            },
        }
    }
}

impl TrainingConfig {
    /// Default configuration for a quality tier, with the epoch count set
    /// from the tier mapping.
    pub fn for_quality(quality: Quality) -> Self {
        let mut config = Self::default();
        config.model.quality = quality;
        config.training.max_epochs = quality.max_epochs();
        config
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Basic sanity checks before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(crate::Error::Config("sample_rate must be non-zero".into()));
        }
        if self.audio.mel_bins == 0 {
            return Err(crate::Error::Config("mel_bins must be non-zero".into()));
        }
        if self.training.batch_size == 0 {
            return Err(crate::Error::Config("batch_size must be non-zero".into()));
        }
        if self.training.max_epochs == 0 {
            return Err(crate::Error::Config("max_epochs must be non-zero".into()));
        }
        Ok(())
    }
}

fn default_mel_bins() -> usize {
    80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_epoch_mapping() {
        assert_eq!(Quality::Low.max_epochs(), 50);
        assert_eq!(Quality::Medium.max_epochs(), 100);
        assert_eq!(Quality::High.max_epochs(), 200);
    }

    #[test]
    fn default_config() {
        let config = TrainingConfig::default();
        assert_eq!(config.audio.sample_rate, 22050);
        assert_eq!(config.audio.mel_bins, 80);
        assert_eq!(config.training.batch_size, 8);
        assert!(config.data.single_speaker);
        config.validate().unwrap();
    }

    #[test]
    fn for_quality_sets_epochs() {
        let config = TrainingConfig::for_quality(Quality::High);
        assert_eq!(config.training.max_epochs, 200);
        assert_eq!(config.model.quality, Quality::High);
    }

    #[test]
    fn json_roundtrip() {
        let config = TrainingConfig::for_quality(Quality::Low);
        let json = serde_json::to_string(&config).unwrap();
        // Section names match the external config.json contract.
        assert!(json.contains("\"audio\""));
        assert!(json.contains("\"training\""));
        assert!(json.contains("\"low\""));
        let back: TrainingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.training.max_epochs, 50);
    }

    #[test]
    fn mel_bins_defaults_when_absent() {
        let json = r#"{
            "audio": {"sample_rate": 16000},
            "model": {"quality": "medium", "hidden_dim": 128, "num_layers": 2},
            "training": {"batch_size": 4, "learning_rate": 1e-4, "max_epochs": 10},
            "data": {"language": "pt", "single_speaker": true, "num_speakers": 1}
        }"#;
        let config: TrainingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.audio.mel_bins, 80);
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut config = TrainingConfig::default();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
