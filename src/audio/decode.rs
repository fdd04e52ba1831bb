//! Corpus audio decoding and resampling.
//!
//! Decodes any accepted corpus format (wav, mp3, flac) through symphonia's
//! probe, mixes down to mono, and linearly resamples to the training rate.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{Error, Result};

/// Decoded mono audio at its source sample rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Resample to the target rate if needed.
    pub fn into_rate(self, target_rate: u32) -> Vec<f32> {
        if self.sample_rate == target_rate {
            self.samples
        } else {
            resample(&self.samples, self.sample_rate, target_rate)
        }
    }
}

/// Decode an audio file into mono f32 samples.
pub fn decode_audio(path: impl AsRef<Path>) -> Result<DecodedAudio> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| Error::Audio(format!("open {}: {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Audio(format!("probe {}: {e}", path.display())))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Audio(format!("no audio track in {}", path.display())))?;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::Audio(format!("missing sample rate in {}", path.display())))?;
    let channels = codec_params
        .channels
        .map(|ch| ch.count())
        .unwrap_or(1)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Audio(format!("decoder for {}: {e}", path.display())))?;

    let mut interleaved = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream surfaces as an I/O error from the reader.
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(Error::Audio(format!("read {}: {e}", path.display()))),
        };
        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            // Recoverable corruption: drop the packet, keep decoding.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(Error::Audio(format!("decode {}: {e}", path.display()))),
        };
        let spec = *audio_buf.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    if interleaved.is_empty() {
        return Err(Error::Audio(format!(
            "decoded 0 samples from {}",
            path.display()
        )));
    }

    Ok(DecodedAudio {
        samples: mix_to_mono(&interleaved, channels),
        sample_rate,
    })
}

/// Average interleaved channels into a mono signal.
fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_mixdown_averages_channels() {
        let interleaved = vec![1.0, -1.0, 0.5, 0.5, 0.0, 1.0];
        let mono = mix_to_mono(&interleaved, 2);
        assert_eq!(mono, vec![0.0, 0.5, 0.5]);
    }

    #[test]
    fn resample_halves_length() {
        let samples = vec![0.0f32; 44100];
        let out = resample(&samples, 44100, 22050);
        assert_eq!(out.len(), 22050);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let samples = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample(&samples, 22050, 22050), samples);
    }

    #[test]
    fn resample_preserves_a_constant_signal() {
        let samples = vec![0.7f32; 1000];
        let out = resample(&samples, 48000, 22050);
        assert!(out.iter().all(|&s| (s - 0.7).abs() < 1e-6));
    }

    #[test]
    fn decodes_a_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..22050)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 22050.0).sin() * 0.5)
            .collect();
        crate::audio::write_wav(&path, &samples, 22050).unwrap();

        let decoded = decode_audio(&path).unwrap();
        assert_eq!(decoded.sample_rate, 22050);
        assert_eq!(decoded.samples.len(), 22050);
    }

    #[test]
    fn garbage_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(decode_audio(&path).is_err());
    }
}
