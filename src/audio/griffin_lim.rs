//! Waveform reconstruction from mel spectrograms via Griffin–Lim.
//!
//! The mel power spectrum is lifted back to a linear-frequency magnitude
//! spectrogram through the transposed filterbank (an approximate
//! pseudo-inverse), then a fixed number of phase-reconstruction iterations
//! alternate between the time and frequency domains. Phase starts at zero,
//! so reconstruction is deterministic for identical input.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use super::mel::{db_to_power, hann_window, mel_filterbank};
use super::MelConfig;
use crate::{Error, Result};

/// Fixed iteration count used by the synthesis pipeline.
pub const DEFAULT_ITERATIONS: usize = 32;

/// Griffin–Lim phase reconstruction, configured to match the analysis
/// front-end (same FFT size, hop, window, and filterbank).
pub struct GriffinLim {
    config: MelConfig,
    window: Vec<f64>,
    filterbank: Vec<Vec<f64>>,
    /// Per-frequency-bin filter mass, for the transposed-filterbank lift.
    filter_col_sums: Vec<f64>,
    n_iter: usize,
    fft_forward: std::sync::Arc<dyn rustfft::Fft<f64>>,
    fft_inverse: std::sync::Arc<dyn rustfft::Fft<f64>>,
}

impl GriffinLim {
    pub fn new(config: MelConfig, n_iter: usize) -> Self {
        let window = hann_window(config.win_length);
        let filterbank = mel_filterbank(
            config.n_fft,
            config.n_mels,
            config.sample_rate,
            config.f_min,
            config.f_max,
        );
        let num_bins = config.n_fft / 2 + 1;
        let mut filter_col_sums = vec![0.0f64; num_bins];
        for filter in &filterbank {
            for (bin, &weight) in filter.iter().enumerate() {
                filter_col_sums[bin] += weight;
            }
        }

        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(config.n_fft);
        let fft_inverse = planner.plan_fft_inverse(config.n_fft);

        Self {
            config,
            window,
            filterbank,
            filter_col_sums,
            n_iter,
            fft_forward,
            fft_inverse,
        }
    }

    /// Reconstruct a waveform from a `[n_mels][frames]` dB mel spectrogram.
    pub fn reconstruct(&self, mel_db: &[Vec<f32>]) -> Result<Vec<f32>> {
        if mel_db.len() != self.config.n_mels {
            return Err(Error::Audio(format!(
                "mel spectrogram has {} bins, expected {}",
                mel_db.len(),
                self.config.n_mels
            )));
        }
        let num_frames = mel_db.first().map(Vec::len).unwrap_or(0);
        if num_frames == 0 {
            return Err(Error::Audio("mel spectrogram has zero frames".into()));
        }

        let magnitude = self.mel_to_magnitude(mel_db, num_frames);

        // Zero-phase initial estimate.
        let mut spectrum: Vec<Vec<Complex<f64>>> = magnitude
            .iter()
            .map(|frame| frame.iter().map(|&m| Complex::new(m, 0.0)).collect())
            .collect();

        for _ in 0..self.n_iter {
            let signal = self.istft(&spectrum);
            let rebuilt = self.stft(&signal, num_frames);
            // Keep the rebuilt phase, restore the target magnitude.
            for (t, frame) in spectrum.iter_mut().enumerate() {
                for (k, cell) in frame.iter_mut().enumerate() {
                    let phase = rebuilt[t][k];
                    let norm = phase.norm();
                    *cell = if norm > 1e-12 {
                        phase / norm * magnitude[t][k]
                    } else {
                        Complex::new(magnitude[t][k], 0.0)
                    };
                }
            }
        }

        let signal = self.istft(&spectrum);

        // Drop the centered-analysis padding when there is room for it.
        let pad = self.config.n_fft / 2;
        let trimmed: Vec<f32> = if signal.len() > 2 * pad {
            signal[pad..signal.len() - pad]
                .iter()
                .map(|&s| s as f32)
                .collect()
        } else {
            signal.iter().map(|&s| s as f32).collect()
        };

        Ok(trimmed)
    }

    /// Lift mel dB values to a one-sided linear magnitude spectrogram,
    /// `[frames][n_fft/2 + 1]`.
    fn mel_to_magnitude(&self, mel_db: &[Vec<f32>], num_frames: usize) -> Vec<Vec<f64>> {
        let num_bins = self.config.n_fft / 2 + 1;
        let mut magnitude = vec![vec![0.0f64; num_bins]; num_frames];

        for t in 0..num_frames {
            for (bin, mag) in magnitude[t].iter_mut().enumerate() {
                let mut power = 0.0f64;
                for (mel_idx, filter) in self.filterbank.iter().enumerate() {
                    let weight = filter[bin];
                    if weight > 0.0 {
                        power += weight * db_to_power(mel_db[mel_idx][t]);
                    }
                }
                let mass = self.filter_col_sums[bin];
                if mass > 1e-10 {
                    power /= mass;
                }
                *mag = power.sqrt();
            }
        }

        magnitude
    }

    /// Forward STFT over a reconstruction-length signal, fixed frame count.
    fn stft(&self, signal: &[f64], num_frames: usize) -> Vec<Vec<Complex<f64>>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let num_bins = n_fft / 2 + 1;

        (0..num_frames)
            .map(|t| {
                let start = t * hop;
                let mut buffer: Vec<Complex<f64>> = (0..n_fft)
                    .map(|i| {
                        let sample = signal.get(start + i).copied().unwrap_or(0.0);
                        Complex::new(sample * self.window[i], 0.0)
                    })
                    .collect();
                self.fft_forward.process(&mut buffer);
                buffer.truncate(num_bins);
                buffer
            })
            .collect()
    }

    /// Inverse STFT with windowed overlap-add.
    fn istft(&self, spectrum: &[Vec<Complex<f64>>]) -> Vec<f64> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let num_frames = spectrum.len();
        let out_len = (num_frames - 1) * hop + n_fft;

        let mut signal = vec![0.0f64; out_len];
        let mut weight = vec![0.0f64; out_len];

        for (t, one_sided) in spectrum.iter().enumerate() {
            // Rebuild the full Hermitian spectrum from the one-sided half.
            let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
            buffer[..one_sided.len()].copy_from_slice(one_sided);
            for k in (n_fft / 2 + 1)..n_fft {
                buffer[k] = buffer[n_fft - k].conj();
            }

            self.fft_inverse.process(&mut buffer);

            let start = t * hop;
            for i in 0..n_fft {
                let w = self.window[i];
                signal[start + i] += buffer[i].re / n_fft as f64 * w;
                weight[start + i] += w * w;
            }
        }

        for (sample, w) in signal.iter_mut().zip(weight.iter()) {
            if *w > 1e-8 {
                *sample /= *w;
            }
        }

        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MelSpectrogram, DB_FLOOR};

    fn small_config() -> MelConfig {
        MelConfig::for_rate(22050, 80)
    }

    #[test]
    fn output_length_is_deterministic_in_frames() {
        let gl = GriffinLim::new(small_config(), 2);
        let mel = vec![vec![DB_FLOOR / 2.0; 20]; 80];
        let out = gl.reconstruct(&mel).unwrap();
        // (20 - 1) * 256 + 1024 total, minus n_fft/2 trim on both sides.
        assert_eq!(out.len(), 19 * 256);
    }

    #[test]
    fn reconstruction_is_deterministic() {
        let gl = GriffinLim::new(small_config(), 4);
        let mel: Vec<Vec<f32>> = (0..80)
            .map(|m| (0..30).map(|t| -((m + t) as f32 % 60.0)).collect())
            .collect();
        let a = gl.reconstruct(&mel).unwrap();
        let b = gl.reconstruct(&mel).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn round_trip_from_analysis_produces_audio() {
        let analysis = MelSpectrogram::new(small_config());
        let samples: Vec<f32> = (0..11025)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / 22050.0).sin() as f32)
            .collect();
        let mel = analysis.process(&samples);

        let gl = GriffinLim::new(small_config(), 8);
        let out = gl.reconstruct(&mel).unwrap();

        assert!(!out.is_empty());
        assert!(out.iter().all(|s| s.is_finite()));
        let energy: f32 = out.iter().map(|s| s * s).sum();
        assert!(energy > 0.0, "reconstruction should carry energy");
    }

    #[test]
    fn wrong_bin_count_is_rejected() {
        let gl = GriffinLim::new(small_config(), 1);
        let mel = vec![vec![0.0f32; 10]; 40];
        assert!(gl.reconstruct(&mel).is_err());
    }

    #[test]
    fn zero_frames_rejected() {
        let gl = GriffinLim::new(small_config(), 1);
        let mel = vec![Vec::new(); 80];
        assert!(gl.reconstruct(&mel).is_err());
    }
}
