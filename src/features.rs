//! Per-sample feature extraction: audio → mel spectrogram, text → phonemes.
//!
//! Each corpus record is decoded, peak-normalized, resampled to the training
//! rate, and converted to a dB mel spectrogram; its text is encoded to
//! phoneme ids. Per-sample failures are recorded on the run status and the
//! sample is skipped — only an empty surviving set is fatal to the caller.

use crate::audio::{decode_audio, peak_normalize, MelConfig, MelSpectrogram};
use crate::config::TrainingConfig;
use crate::corpus::CorpusRecord;
use crate::phoneme::PhonemeEncoder;
use crate::status::StatusHandle;
use crate::Result;

/// Extracted training features for one sample.
#[derive(Debug, Clone)]
pub struct FeatureSample {
    pub sample_id: String,
    /// Mono waveform at the configured sample rate, peak-normalized.
    pub waveform: Vec<f32>,
    /// `[mel_bins][frames]` dB spectrogram.
    pub mel: Vec<Vec<f32>>,
    /// BOS-prefixed, EOS-terminated token sequence.
    pub phoneme_ids: Vec<u32>,
}

/// Waveform → features converter shared across a run.
pub struct FeatureExtractor {
    sample_rate: u32,
    mel: MelSpectrogram,
    encoder: PhonemeEncoder,
}

impl FeatureExtractor {
    pub fn new(config: &TrainingConfig) -> Self {
        let mel_config = MelConfig::for_rate(config.audio.sample_rate, config.audio.mel_bins);
        Self {
            sample_rate: config.audio.sample_rate,
            mel: MelSpectrogram::new(mel_config),
            encoder: PhonemeEncoder::new(&config.data.language),
        }
    }

    pub fn mel_config(&self) -> &MelConfig {
        self.mel.config()
    }

    /// Extract features for a single record.
    pub fn extract(&self, record: &CorpusRecord) -> Result<FeatureSample> {
        let decoded = decode_audio(&record.audio_path)?;
        let mut waveform = decoded.into_rate(self.sample_rate);
        peak_normalize(&mut waveform);

        let mel = self.mel.process(&waveform);
        let phoneme_ids = self.encoder.encode(&record.text);

        Ok(FeatureSample {
            sample_id: record.sample_id.clone(),
            waveform,
            mel,
            phoneme_ids,
        })
    }

    /// Extract features for every record, skipping failures.
    ///
    /// Failure reasons are appended to the status error list; sample counts
    /// are updated as extraction proceeds.
    pub fn extract_all(
        &self,
        records: &[CorpusRecord],
        status: &StatusHandle,
    ) -> Vec<FeatureSample> {
        let total = records.len();
        let mut samples = Vec::with_capacity(total);

        for record in records {
            match self.extract(record) {
                Ok(sample) => samples.push(sample),
                Err(error) => {
                    status.push_error(format!(
                        "sample {}: {error}",
                        record.sample_id
                    ));
                }
            }
            status.set_sample_counts(samples.len(), total);
        }

        samples
    }
}
