use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single `.play` attempt.
///
/// These never escape the playback worker: they are logged and published as
/// `PlaybackEvent::Failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported platform for URL {url}")]
    UnsupportedPlatform { url: String },

    #[error("unsupported audio format {format:?}, expected mp3 or opus")]
    UnsupportedFormat { format: String },

    #[error("failed to spawn media fetcher {program}")]
    FetchProcess {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("fetched file {} is missing or unreadable", path.display())]
    FetchArtifactMissing { path: PathBuf },

    #[error("could not open {} for decoding", path.display())]
    DecodeOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read audio stream format of {}: {reason}", path.display())]
    DecodeFormat { path: PathBuf, reason: String },

    #[error("could not open {}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not determine size of {}", path.display())]
    FileSize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("voice transport not ready after {waited_ms} ms")]
    TransportNotReady { waited_ms: u128 },

    #[error("no voice connection for guild {guild_id}")]
    NoVoiceConnection { guild_id: u64 },

    #[error("playback cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn decode_format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::DecodeFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
