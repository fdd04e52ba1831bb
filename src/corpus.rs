//! Corpus loading: metadata parsing and audio file resolution.
//!
//! A corpus directory contains a pipe-delimited `metadata.csv` and a `wav/`
//! subdirectory of audio files named by sample id:
//!
//! ```text
//! corpus/
//!   metadata.csv        a001|Hello there.
//!                       a002|maria|Good morning.
//!   wav/
//!     a001.wav
//!     a002.flac
//! ```
//!
//! Lines carry either `id|text` or `id|speaker|text`. Records whose audio
//! file cannot be resolved are skipped with a recorded reason; a missing
//! metadata file or audio directory is fatal.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Metadata file name inside the corpus directory.
pub const METADATA_FILE: &str = "metadata.csv";

/// Audio subdirectory name inside the corpus directory.
pub const AUDIO_DIR: &str = "wav";

/// Accepted audio file extensions, tried in order.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];

/// One audio/text pair from the metadata file.
#[derive(Debug, Clone)]
pub struct CorpusRecord {
    pub sample_id: String,
    pub text: String,
    pub speaker: Option<String>,
    pub audio_path: PathBuf,
}

/// A metadata line that was excluded, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub sample_id: String,
    pub reason: String,
}

/// Loaded corpus: usable records in metadata order plus the skip list.
#[derive(Debug)]
pub struct Corpus {
    pub records: Vec<CorpusRecord>,
    pub skipped: Vec<SkippedRecord>,
}

impl Corpus {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Load a corpus directory.
///
/// Fatal only when `metadata.csv` or the `wav/` directory is absent.
/// Everything else degrades per record.
pub fn load_corpus(dir: impl AsRef<Path>) -> Result<Corpus> {
    let dir = dir.as_ref();
    let metadata_path = dir.join(METADATA_FILE);
    let audio_dir = dir.join(AUDIO_DIR);

    if !metadata_path.is_file() {
        return Err(Error::Corpus(format!(
            "{METADATA_FILE} not found in {}",
            dir.display()
        )));
    }
    if !audio_dir.is_dir() {
        return Err(Error::Corpus(format!(
            "{AUDIO_DIR}/ directory not found in {}",
            dir.display()
        )));
    }

    let text = std::fs::read_to_string(&metadata_path)?;
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('|').collect();
        let (sample_id, speaker, text) = match fields.as_slice() {
            [id, text] => (id.trim(), None, text.trim()),
            [id, speaker, text] => (id.trim(), Some(speaker.trim()), text.trim()),
            _ => {
                skipped.push(SkippedRecord {
                    sample_id: fields.first().unwrap_or(&"").trim().to_string(),
                    reason: format!("line {}: expected 2 or 3 fields", line_no + 1),
                });
                continue;
            }
        };

        if sample_id.is_empty() {
            skipped.push(SkippedRecord {
                sample_id: String::new(),
                reason: format!("line {}: empty sample id", line_no + 1),
            });
            continue;
        }

        match resolve_audio(&audio_dir, sample_id) {
            Some(audio_path) => records.push(CorpusRecord {
                sample_id: sample_id.to_string(),
                text: text.to_string(),
                speaker: speaker.map(str::to_string),
                audio_path,
            }),
            None => {
                skipped.push(SkippedRecord {
                    sample_id: sample_id.to_string(),
                    reason: format!(
                        "no audio file {sample_id}.{{{}}} in {AUDIO_DIR}/",
                        AUDIO_EXTENSIONS.join(",")
                    ),
                });
            }
        }
    }

    for skip in &skipped {
        tracing::warn!(sample_id = %skip.sample_id, "skipping record: {}", skip.reason);
    }
    tracing::info!(
        records = records.len(),
        skipped = skipped.len(),
        "corpus loaded from {}",
        dir.display()
    );

    Ok(Corpus { records, skipped })
}

/// Find `<id>.<ext>` under the audio directory for the accepted extensions.
fn resolve_audio(audio_dir: &Path, sample_id: &str) -> Option<PathBuf> {
    AUDIO_EXTENSIONS
        .iter()
        .map(|ext| audio_dir.join(format!("{sample_id}.{ext}")))
        .find(|path| path.is_file())
}
