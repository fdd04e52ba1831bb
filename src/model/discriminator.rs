//! Discriminator: per-frame realness scores over the mel time axis.
//!
//! ```text
//! [B, mel, T]
//!   → Conv1d(mel, 128, k=3, p=1) → LeakyReLU(0.2)
//!   → Conv1d(128, 256, k=3, p=1) → LeakyReLU(0.2)
//!   → Conv1d(256, 1,  k=3, p=1)                    [B, 1, T] logits
//! ```
//!
//! [`Discriminator::score`] applies a sigmoid for probabilities in [0, 1];
//! the raw logits feed the numerically stable BCE loss.

use candle_core::{Module, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, VarBuilder};

use crate::Result;

const LEAKY_SLOPE: f64 = 0.2;

pub struct Discriminator {
    conv1: Conv1d,
    conv2: Conv1d,
    conv3: Conv1d,
}

impl Discriminator {
    pub fn new(vb: VarBuilder, mel_bins: usize) -> Result<Self> {
        let cfg = Conv1dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = conv1d(mel_bins, 128, 3, cfg, vb.pp("conv1"))?;
        let conv2 = conv1d(128, 256, 3, cfg, vb.pp("conv2"))?;
        let conv3 = conv1d(256, 1, 3, cfg, vb.pp("conv3"))?;
        Ok(Self {
            conv1,
            conv2,
            conv3,
        })
    }

    /// Per-frame realness logits, `[B, 1, T]`.
    pub fn logits(&self, mel: &Tensor) -> Result<Tensor> {
        let x = leaky_relu(&self.conv1.forward(mel)?)?;
        let x = leaky_relu(&self.conv2.forward(&x)?)?;
        Ok(self.conv3.forward(&x)?)
    }

    /// Per-frame realness probabilities in [0, 1], `[B, 1, T]`.
    pub fn score(&self, mel: &Tensor) -> Result<Tensor> {
        Ok(candle_nn::ops::sigmoid(&self.logits(mel)?)?)
    }
}

/// `max(x, slope * x)` — equivalent to LeakyReLU for slope < 1.
fn leaky_relu(x: &Tensor) -> Result<Tensor> {
    Ok(x.maximum(&(x * LEAKY_SLOPE)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(mel_bins: usize) -> Discriminator {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Discriminator::new(vb, mel_bins).unwrap()
    }

    #[test]
    fn preserves_time_axis() {
        let disc = build(8);
        let mel = Tensor::zeros((2, 8, 13), DType::F32, &Device::Cpu).unwrap();
        let logits = disc.logits(&mel).unwrap();
        assert_eq!(logits.dims(), &[2, 1, 13]);
    }

    #[test]
    fn scores_are_probabilities() {
        let disc = build(8);
        let mel = Tensor::randn(0f32, 1f32, (1, 8, 10), &Device::Cpu).unwrap();
        let score = disc.score(&mel).unwrap();
        let values: Vec<f32> = score.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn leaky_relu_keeps_sign_information() {
        let x = Tensor::from_vec(vec![-1.0f32, 0.0, 2.0], (3,), &Device::Cpu).unwrap();
        let y = leaky_relu(&x).unwrap();
        let values: Vec<f32> = y.to_vec1().unwrap();
        assert!((values[0] + 0.2).abs() < 1e-6);
        assert_eq!(values[1], 0.0);
        assert!((values[2] - 2.0).abs() < 1e-6);
    }
}
