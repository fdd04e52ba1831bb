//! Generator: phoneme ids → mel spectrogram frames.
//!
//! ```text
//! [B, T] token ids
//!   → Embedding(vocab, hidden)
//!   → bidirectional LSTM (forward + time-reversed, concatenated)  [B, T, 2·hidden]
//!   → Linear(2·hidden, hidden)                                    [B, T, hidden]
//!   → Linear(hidden, 2·hidden) + ReLU → Linear(2·hidden, mel)     [B, T, mel]
//!   → transpose                                                   [B, mel, T]
//! ```
//!
//! One mel frame is predicted per input token; time alignment against the
//! target spectrogram is handled by the training step's truncation policy.

use candle_core::{Module, Tensor};
use candle_nn::rnn::{lstm, LSTMConfig, LSTM, RNN};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};

use crate::Result;

pub struct Generator {
    embedding: Embedding,
    lstm_fwd: LSTM,
    lstm_bwd: LSTM,
    proj: Linear,
    dec_fc1: Linear,
    dec_fc2: Linear,
}

impl Generator {
    pub fn new(
        vb: VarBuilder,
        vocab_size: usize,
        hidden_dim: usize,
        mel_bins: usize,
    ) -> Result<Self> {
        let embedding = embedding(vocab_size, hidden_dim, vb.pp("embedding"))?;
        let lstm_fwd = lstm(
            hidden_dim,
            hidden_dim,
            LSTMConfig::default(),
            vb.pp("lstm_fwd"),
        )?;
        let lstm_bwd = lstm(
            hidden_dim,
            hidden_dim,
            LSTMConfig::default(),
            vb.pp("lstm_bwd"),
        )?;
        let proj = linear(2 * hidden_dim, hidden_dim, vb.pp("proj"))?;
        let dec_fc1 = linear(hidden_dim, 2 * hidden_dim, vb.pp("decoder.fc1"))?;
        let dec_fc2 = linear(2 * hidden_dim, mel_bins, vb.pp("decoder.fc2"))?;

        Ok(Self {
            embedding,
            lstm_fwd,
            lstm_bwd,
            proj,
            dec_fc1,
            dec_fc2,
        })
    }

    /// Predict a mel spectrogram from `[B, T]` token ids.
    ///
    /// Returns `[B, mel_bins, T]`.
    pub fn forward(&self, phonemes: &Tensor) -> Result<Tensor> {
        let embedded = self.embedding.forward(phonemes)?; // [B, T, H]

        let fwd = stack_hidden(&self.lstm_fwd.seq(&embedded)?)?; // [B, T, H]

        let reversed = flip_dim(&embedded, 1)?;
        let bwd = flip_dim(&stack_hidden(&self.lstm_bwd.seq(&reversed)?)?, 1)?;

        let hidden = Tensor::cat(&[&fwd, &bwd], 2)?; // [B, T, 2H]
        let hidden = self.proj.forward(&hidden)?;

        let hidden = self.dec_fc1.forward(&hidden)?.relu()?;
        let mel = self.dec_fc2.forward(&hidden)?; // [B, T, mel]

        Ok(mel.transpose(1, 2)?)
    }
}

/// Reverse `t` along dimension `dim` (equivalent to `Tensor::flip(&[dim])`).
fn flip_dim(t: &Tensor, dim: usize) -> Result<Tensor> {
    let n = t.dim(dim)?;
    let idx: Vec<u32> = (0..n as u32).rev().collect();
    let index = Tensor::from_vec(idx, n, t.device())?;
    Ok(t.index_select(&index, dim)?)
}

/// Stack per-timestep LSTM hidden states into `[B, T, H]`.
fn stack_hidden(states: &[candle_nn::rnn::LSTMState]) -> Result<Tensor> {
    let hidden: Vec<Tensor> = states.iter().map(|state| state.h().clone()).collect();
    Ok(Tensor::stack(&hidden, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn build(hidden: usize, mel: usize) -> Generator {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Generator::new(vb, 256, hidden, mel).unwrap()
    }

    #[test]
    fn one_frame_per_token() {
        let generator = build(16, 8);
        let ids = Tensor::from_vec(vec![1u32, 5, 9, 42, 2], (1, 5), &Device::Cpu).unwrap();
        let mel = generator.forward(&ids).unwrap();
        assert_eq!(mel.dims(), &[1, 8, 5]);
    }

    #[test]
    fn batch_dimension_preserved() {
        let generator = build(16, 8);
        let ids: Vec<u32> = (0..3 * 9).map(|i| (i % 200 + 4) as u32).collect();
        let ids = Tensor::from_vec(ids, (3, 9), &Device::Cpu).unwrap();
        let mel = generator.forward(&ids).unwrap();
        assert_eq!(mel.dims(), &[3, 8, 9]);
    }

    #[test]
    fn output_is_finite() {
        let generator = build(16, 8);
        let ids = Tensor::from_vec(vec![1u32, 100, 200, 2], (1, 4), &Device::Cpu).unwrap();
        let mel = generator.forward(&ids).unwrap();
        let values: Vec<f32> = mel.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
