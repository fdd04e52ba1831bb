//! voiceforge CLI — train a voice model and synthesize speech with it.
//!
//! # Output
//!
//! Both subcommands print a one-line JSON summary to stdout on success:
//!
//! ```json
//! {"checkpoint":"out/final_model.safetensors","artifact":"out/my_voice.voice.safetensors","samples":12}
//! {"path":"/tmp/hello.wav","duration_s":1.4,"sample_rate":22050,"tier":"exported-graph"}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use voiceforge::config::{Quality, TrainingConfig};
use voiceforge::inference::InferenceEngine;
use voiceforge::training::TrainingSession;

#[derive(Parser, Debug)]
#[command(
    name = "voiceforge",
    about = "Train custom text-to-speech voices and synthesize speech",
    long_about = "Train a voice model from a corpus directory (metadata.csv + wav/),\n\
                  export it to a portable artifact, and synthesize speech from text.\n\
                  Progress lines are printed during training; a JSON summary line is\n\
                  printed to stdout on success."
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a voice model from a corpus and export the inference artifact.
    Train {
        /// Corpus directory containing metadata.csv and a wav/ subdirectory.
        #[arg(long, short = 'c')]
        corpus: PathBuf,

        /// Output directory for the checkpoint and exported artifact.
        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Model name, used for the artifact file names.
        #[arg(long, short = 'n')]
        name: String,

        /// Quality tier: low (50 epochs), medium (100), or high (200).
        #[arg(long, default_value = "medium")]
        quality: String,

        /// Language tag for phoneme segmentation ("en", "pt", ...).
        #[arg(long, default_value = "en")]
        language: String,

        /// Training sample rate in Hz.
        #[arg(long, default_value_t = 22050)]
        sample_rate: u32,

        /// Treat the corpus as multi-speaker (metadata lines id|speaker|text).
        #[arg(long)]
        multi_speaker: bool,
    },

    /// Synthesize speech from text using a trained model.
    Say {
        /// Model path: exported graph (.voice.safetensors) or checkpoint.
        #[arg(long, short = 'm')]
        model: PathBuf,

        /// Matching config path (.voice.json or final_model.json).
        #[arg(long)]
        config: PathBuf,

        /// Text to speak.
        #[arg(long, short = 't')]
        text: String,

        /// Output WAV path.
        #[arg(long, short = 'o')]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Args::parse().command {
        Command::Train {
            corpus,
            output,
            name,
            quality,
            language,
            sample_rate,
            multi_speaker,
        } => {
            let quality: Quality = quality
                .parse()
                .map_err(|e| anyhow::anyhow!("{e}"))?;

            let mut config = TrainingConfig::for_quality(quality);
            config.audio.sample_rate = sample_rate;
            config.data.language = language;
            config.data.single_speaker = !multi_speaker;
            config.data.num_speakers = if multi_speaker { 2 } else { 1 };

            let session = TrainingSession::new(&name, &corpus, &output, config)
                .with_progress(|step, percent| {
                    eprintln!("[{percent:3}%] {step}");
                });
            let outcome = session.run()?;

            println!(
                "{}",
                serde_json::json!({
                    "checkpoint": outcome.checkpoint.weights,
                    "artifact": outcome.artifact.as_ref().map(|a| &a.graph),
                    "samples": outcome.trained_samples,
                })
            );
        }

        Command::Say {
            model,
            config,
            text,
            output,
        } => {
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let engine = InferenceEngine::load(&model, &config);
            if !engine.has_model() {
                eprintln!("warning: no trained model available, output will be synthetic");
            }
            let audio = engine.synthesize_to_file(&text, &output)?;

            println!(
                "{}",
                serde_json::json!({
                    "path": output,
                    "duration_s": audio.duration_secs(),
                    "sample_rate": audio.sample_rate,
                    "tier": audio.tier.label(),
                })
            );
        }
    }

    Ok(())
}
