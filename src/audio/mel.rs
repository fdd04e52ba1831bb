//! Log-power mel spectrograms via STFT + mel filterbank.
//!
//! Training front-end configuration:
//! - Sample rate: 22050 Hz
//! - FFT size: 1024 (513 frequency bins)
//! - Window: Hann, length 1024
//! - Hop length: 256
//! - Mel bins: 80, range 0 Hz – Nyquist
//! - Mel scale/norm: Slaney
//! - Padding: centered, reflect, n_fft/2 on each side
//! - Scale: power spectrum → dB referenced to the peak, floored 80 dB below
//!
//! With centered padding the frame count is `1 + samples / hop`, a
//! deterministic function of the waveform length.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Spectrograms never go below this many dB (peak-referenced scale).
pub const DB_FLOOR: f32 = -80.0;

/// Configuration for the mel spectrogram.
#[derive(Debug, Clone)]
pub struct MelConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub win_length: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub f_min: f64,
    pub f_max: f64,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self::for_rate(22050, 80)
    }
}

impl MelConfig {
    /// Standard front-end for a sample rate and mel bin count.
    pub fn for_rate(sample_rate: u32, n_mels: usize) -> Self {
        Self {
            sample_rate,
            n_fft: 1024,
            win_length: 1024,
            hop_length: 256,
            n_mels,
            f_min: 0.0,
            f_max: sample_rate as f64 / 2.0,
        }
    }

    /// Frame count produced for a waveform of `num_samples`.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if num_samples == 0 {
            0
        } else {
            1 + num_samples / self.hop_length
        }
    }
}

/// Mel spectrogram processor.
///
/// Pre-computes the Hann window, FFT plan, and mel filterbank on
/// construction; [`MelSpectrogram::process`] converts audio samples to a
/// peak-referenced dB mel spectrogram.
pub struct MelSpectrogram {
    config: MelConfig,
    window: Vec<f64>,
    filterbank: Vec<Vec<f64>>,
    fft: std::sync::Arc<dyn rustfft::Fft<f64>>,
}

impl MelSpectrogram {
    pub fn new(config: MelConfig) -> Self {
        let window = hann_window(config.win_length);
        let filterbank = mel_filterbank(
            config.n_fft,
            config.n_mels,
            config.sample_rate,
            config.f_min,
            config.f_max,
        );
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        Self {
            config,
            window,
            filterbank,
            fft,
        }
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    pub(super) fn filterbank(&self) -> &[Vec<f64>] {
        &self.filterbank
    }

    /// Compute a dB mel spectrogram from mono audio samples.
    ///
    /// Output: `[n_mels][num_frames]`, values in `[DB_FLOOR, 0]`.
    pub fn process(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        if samples.is_empty() {
            return vec![Vec::new(); self.config.n_mels];
        }

        let samples_f64: Vec<f64> = samples.iter().map(|&s| s as f64).collect();

        // Centered analysis: reflect-pad n_fft/2 on both sides.
        let pad = self.config.n_fft / 2;
        let padded = reflect_pad(&samples_f64, pad, pad);

        let power_frames = self.stft_power(&padded);
        let num_frames = power_frames.len();

        // Mel filterbank over the power spectrum.
        let mut mel_power = vec![vec![0.0f64; num_frames]; self.config.n_mels];
        let mut peak = 0.0f64;
        for (frame_idx, frame) in power_frames.iter().enumerate() {
            for (mel_idx, filter) in self.filterbank.iter().enumerate() {
                let mut sum = 0.0;
                for (bin_idx, &weight) in filter.iter().enumerate() {
                    if weight > 0.0 {
                        sum += weight * frame[bin_idx];
                    }
                }
                mel_power[mel_idx][frame_idx] = sum;
                peak = peak.max(sum);
            }
        }

        // Convert to dB referenced to the peak, floored at DB_FLOOR.
        let ref_db = 10.0 * peak.max(1e-10).log10();
        mel_power
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|p| {
                        let db = 10.0 * p.max(1e-10).log10() - ref_db;
                        (db as f32).max(DB_FLOOR)
                    })
                    .collect()
            })
            .collect()
    }

    /// Short-time Fourier transform returning one-sided power spectra.
    fn stft_power(&self, padded: &[f64]) -> Vec<Vec<f64>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let num_bins = n_fft / 2 + 1;

        let num_frames = (padded.len().saturating_sub(n_fft)) / hop + 1;
        let mut frames = Vec::with_capacity(num_frames);

        for frame_idx in 0..num_frames {
            let start = frame_idx * hop;
            let end = start + n_fft;
            if end > padded.len() {
                break;
            }

            let mut buffer: Vec<Complex<f64>> = (0..n_fft)
                .map(|i| Complex::new(padded[start + i] * self.window[i], 0.0))
                .collect();

            self.fft.process(&mut buffer);

            let power: Vec<f64> = buffer[..num_bins]
                .iter()
                .map(|c| c.re * c.re + c.im * c.im)
                .collect();

            frames.push(power);
        }

        frames
    }
}

/// Convert peak-referenced dB back to linear power.
pub(super) fn db_to_power(db: f32) -> f64 {
    10f64.powf(db as f64 / 10.0)
}

/// Generate a Hann window of the given length.
pub(super) fn hann_window(length: usize) -> Vec<f64> {
    (0..length)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / length as f64;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

/// Reflect-pad a signal on both sides.
fn reflect_pad(signal: &[f64], pad_left: usize, pad_right: usize) -> Vec<f64> {
    let len = signal.len();
    let total = pad_left + len + pad_right;
    let mut padded = Vec::with_capacity(total);

    for i in (1..=pad_left).rev() {
        padded.push(signal[i.min(len - 1)]);
    }

    padded.extend_from_slice(signal);

    for i in 0..pad_right {
        let idx = len.saturating_sub(2 + i);
        padded.push(signal[idx]);
    }

    padded
}

/// Build a Slaney-normalized mel filterbank.
///
/// Returns `n_mels` filters, each with `n_fft/2 + 1` weights.
pub(super) fn mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: u32,
    f_min: f64,
    f_max: f64,
) -> Vec<Vec<f64>> {
    let num_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;

    // Mel scale conversion points (n_mels + 2 edges).
    let mel_min = hz_to_mel_slaney(f_min);
    let mel_max = hz_to_mel_slaney(f_max);

    let mel_points: Vec<f64> = (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64)
        .collect();

    let hz_points: Vec<f64> = mel_points.iter().map(|&m| mel_to_hz_slaney(m)).collect();

    let bin_freqs: Vec<f64> = (0..num_bins)
        .map(|i| sr * i as f64 / n_fft as f64)
        .collect();

    let mut filters = Vec::with_capacity(n_mels);

    for i in 0..n_mels {
        let f_left = hz_points[i];
        let f_center = hz_points[i + 1];
        let f_right = hz_points[i + 2];

        // Slaney normalization: 2 / (f_right - f_left)
        let norm = 2.0 / (f_right - f_left);

        let filter: Vec<f64> = bin_freqs
            .iter()
            .map(|&f| {
                if f < f_left || f > f_right {
                    0.0
                } else if f <= f_center {
                    norm * (f - f_left) / (f_center - f_left)
                } else {
                    norm * (f_right - f) / (f_right - f_center)
                }
            })
            .collect();

        filters.push(filter);
    }

    filters
}

/// Convert frequency in Hz to Slaney mel scale.
///
/// Below 1000 Hz: linear mapping (mel = 3 * f / 200).
/// Above 1000 Hz: logarithmic (mel = 15 + 27 * ln(f / 1000) / ln(6.4)).
fn hz_to_mel_slaney(hz: f64) -> f64 {
    if hz < 1000.0 {
        3.0 * hz / 200.0
    } else {
        15.0 + 27.0 * (hz / 1000.0).ln() / (6.4_f64).ln()
    }
}

/// Convert Slaney mel scale to frequency in Hz.
fn mel_to_hz_slaney(mel: f64) -> f64 {
    if mel < 15.0 {
        200.0 * mel / 3.0
    } else {
        1000.0 * ((mel - 15.0) * (6.4_f64).ln() / 27.0).exp()
    }
}
