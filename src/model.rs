//! The voice model: generator/discriminator pair and the training step.
//!
//! ## Components
//!
//! - [`generator`] — token embedding → bidirectional LSTM encoder → linear
//!   projection → feed-forward decoder → mel frames
//! - [`discriminator`] — 1-D convolution stack over the mel time axis,
//!   scoring per-frame realness
//!
//! The training step predicts a mel spectrogram from phoneme ids, truncates
//! prediction and target to their common minimum time length, and combines
//! `mse + 0.1 * bce` into one loss backpropagated through both sub-models in
//! a single optimizer step. This is a simplified regime, not an alternating
//! GAN schedule, and carries no adversarial-stability guarantee.

pub mod discriminator;
pub mod generator;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::config::TrainingConfig;
use crate::phoneme::VOCAB_SIZE;
use crate::Result;

pub use discriminator::Discriminator;
pub use generator::Generator;

/// Loss breakdown for one training step.
#[derive(Debug, Clone, Copy)]
pub struct StepMetrics {
    pub total_loss: f32,
    pub reconstruction_loss: f32,
    pub adversarial_loss: f32,
}

/// Generator + discriminator trained jointly.
pub struct VoiceModel {
    generator: Generator,
    discriminator: Discriminator,
}

impl VoiceModel {
    pub fn new(vb: VarBuilder, config: &TrainingConfig) -> Result<Self> {
        let generator = Generator::new(
            vb.pp("generator"),
            VOCAB_SIZE as usize,
            config.model.hidden_dim,
            config.audio.mel_bins,
        )?;
        let discriminator = Discriminator::new(vb.pp("discriminator"), config.audio.mel_bins)?;
        Ok(Self {
            generator,
            discriminator,
        })
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// One training step over a batch.
    ///
    /// `phonemes`: `[B, T_tok]` token ids. `target_mel`: `[B, mel_bins,
    /// T_frames]` dB spectrogram. Both spectrograms are truncated to the
    /// shorter time axis before any loss is computed; no frame beyond that
    /// length is ever indexed.
    pub fn training_step(
        &self,
        phonemes: &Tensor,
        target_mel: &Tensor,
    ) -> Result<(Tensor, StepMetrics)> {
        let predicted = self.generator.forward(phonemes)?;

        let pred_len = predicted.dim(2)?;
        let target_len = target_mel.dim(2)?;
        let common_len = pred_len.min(target_len);

        let predicted = predicted.narrow(2, 0, common_len)?;
        let target = target_mel.narrow(2, 0, common_len)?;

        let reconstruction = candle_nn::loss::mse(&predicted, &target)?;

        // Real frames labeled 1, detached fakes labeled 0.
        let real_logits = self.discriminator.logits(&target)?;
        let fake_logits = self.discriminator.logits(&predicted.detach())?;
        let real_loss = candle_nn::loss::binary_cross_entropy_with_logit(
            &real_logits,
            &real_logits.ones_like()?,
        )?;
        let fake_loss = candle_nn::loss::binary_cross_entropy_with_logit(
            &fake_logits,
            &fake_logits.zeros_like()?,
        )?;
        let adversarial = (&real_loss + &fake_loss)?;

        let total = (&reconstruction + &(&adversarial * 0.1)?)?;

        let metrics = StepMetrics {
            total_loss: total.to_scalar::<f32>()?,
            reconstruction_loss: reconstruction.to_scalar::<f32>()?,
            adversarial_loss: adversarial.to_scalar::<f32>()?,
        };

        Ok((total, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn tiny_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.model.hidden_dim = 16;
        config.audio.mel_bins = 8;
        config
    }

    fn tiny_model(varmap: &VarMap) -> VoiceModel {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        VoiceModel::new(vb, &tiny_config()).unwrap()
    }

    fn token_batch(batch: usize, len: usize) -> Tensor {
        let ids: Vec<u32> = (0..batch * len).map(|i| (i % 250 + 4) as u32).collect();
        Tensor::from_vec(ids, (batch, len), &Device::Cpu).unwrap()
    }

    #[test]
    fn generator_output_shape() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let phonemes = token_batch(2, 7);
        let mel = model.generator().forward(&phonemes).unwrap();
        assert_eq!(mel.dims(), &[2, 8, 7]);
    }

    #[test]
    fn training_step_truncates_to_shorter_target() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        // Prediction spans 12 frames, target only 9.
        let phonemes = token_batch(1, 12);
        let target = Tensor::zeros((1, 8, 9), DType::F32, &Device::Cpu).unwrap();
        let (loss, metrics) = model.training_step(&phonemes, &target).unwrap();
        assert_eq!(loss.dims().len(), 0);
        assert!(metrics.total_loss.is_finite());
        assert!(metrics.reconstruction_loss >= 0.0);
    }

    #[test]
    fn training_step_truncates_to_shorter_prediction() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        // Prediction spans 5 frames, target 20.
        let phonemes = token_batch(1, 5);
        let target = Tensor::zeros((1, 8, 20), DType::F32, &Device::Cpu).unwrap();
        let (_, metrics) = model.training_step(&phonemes, &target).unwrap();
        assert!(metrics.total_loss.is_finite());
    }

    #[test]
    fn total_combines_reconstruction_and_weighted_adversarial() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let phonemes = token_batch(2, 6);
        let target = Tensor::zeros((2, 8, 6), DType::F32, &Device::Cpu).unwrap();
        let (_, metrics) = model.training_step(&phonemes, &target).unwrap();
        let expected = metrics.reconstruction_loss + 0.1 * metrics.adversarial_loss;
        assert!((metrics.total_loss - expected).abs() < 1e-4);
    }

    #[test]
    fn loss_is_differentiable() {
        let varmap = VarMap::new();
        let model = tiny_model(&varmap);
        let phonemes = token_batch(1, 4);
        let target = Tensor::zeros((1, 8, 4), DType::F32, &Device::Cpu).unwrap();
        let (loss, _) = model.training_step(&phonemes, &target).unwrap();
        let grads = loss.backward().unwrap();
        // At least the embedding table must receive a gradient.
        let has_grad = varmap
            .all_vars()
            .iter()
            .any(|var| grads.get(var.as_tensor()).is_some());
        assert!(has_grad);
    }
}
