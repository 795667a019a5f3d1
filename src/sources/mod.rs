//! Loading fetched media files into memory.
//!
//! MP3 files are decoded to transport-ready PCM, Ogg/Opus files are kept as
//! raw container bytes and split into packets while streaming.

pub mod mp3;
pub mod ogg;

use crate::{
    buffer::{AudioBuffer, AudioKind},
    error::PipelineError,
    resolver::Format,
};
use std::path::{Path, PathBuf};
use tokio::task::JoinError;

/// A stereo sample pair (left, right) as 16-bit signed integers.
pub type Sample = (i16, i16);

/// Output sample rate for all decoded audio (Discord native format).
pub const OUTPUT_SAMPLE_RATE: u32 = crate::constants::SAMPLE_RATE;

/// Loads `path` into a new buffer with `reserve` bytes of capacity.
///
/// Decoding is blocking work and runs on the blocking thread pool.
pub async fn load(
    path: PathBuf,
    format: Format,
    reserve: usize,
) -> Result<AudioBuffer, PipelineError> {
    let origin = path.clone();

    let result = tokio::task::spawn_blocking(move || {
        let kind = match format.resolved() {
            Format::Mp3 => AudioKind::transport_pcm(),
            _ => AudioKind::OggContainer,
        };
        let mut buffer = AudioBuffer::with_capacity(kind, reserve);

        match kind {
            AudioKind::Pcm { .. } => mp3::decode_file(&path, &mut buffer)?,
            AudioKind::OggContainer => ogg::load_file(&path, &mut buffer)?,
        }

        Ok(buffer)
    })
    .await;

    result.unwrap_or_else(|e| Err(loader_failed(&origin, e)))
}

/// A loader task that panicked or was aborted failed to decode its file.
pub(crate) fn loader_failed(path: &Path, e: JoinError) -> PipelineError {
    error!("Audio loader task for {} failed: {e:?}", path.display());
    PipelineError::decode_format(path, format!("loader task failed: {e}"))
}
