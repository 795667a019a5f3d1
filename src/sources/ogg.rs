//! Ogg/Opus files are never decoded here: the file is loaded byte-for-byte
//! and its Opus packets are later handed to the voice transport unchanged.

use crate::{
    buffer::{AudioBuffer, AudioKind},
    error::PipelineError,
};
use bytes::Bytes;
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const OPUS_HEAD_MAGIC: &[u8] = b"OpusHead";
const OPUS_TAGS_MAGIC: &[u8] = b"OpusTags";

/// Reads the whole file at `path` into `buffer` without interpreting it.
pub fn load_file(path: &Path, buffer: &mut AudioBuffer) -> Result<(), PipelineError> {
    buffer.reset(AudioKind::OggContainer);

    let mut file = File::open(path).map_err(|source| PipelineError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let size = file
        .metadata()
        .map_err(|source| PipelineError::FileSize {
            path: path.to_path_buf(),
            source,
        })?
        .len() as usize;

    buffer
        .read_from(&mut file, size)
        .map_err(|source| PipelineError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

    debug!("Loaded {} ({} bytes)", path.display(), buffer.len());

    Ok(())
}

/// Iterates the audio packets of an in-memory Ogg container.
///
/// Yields each packet's raw payload. Stream header packets are skipped and
/// iteration ends at the end of the container or after the first error.
pub struct OggPacketReader {
    origin: PathBuf,
    format: Box<dyn FormatReader>,
    track_id: u32,
    finished: bool,
}

impl OggPacketReader {
    /// `origin` names the data in errors and logs, usually its cache path.
    pub fn new(bytes: Vec<u8>, origin: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let origin = origin.into();

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| PipelineError::decode_format(&origin, e))?;

        let format = probed.format;

        let track_id = format
            .default_track()
            .map(|track| track.id)
            .ok_or_else(|| PipelineError::decode_format(&origin, "no logical stream found"))?;

        Ok(Self {
            origin,
            format,
            track_id,
            finished: false,
        })
    }

    fn is_header_packet(data: &[u8]) -> bool {
        data.starts_with(OPUS_HEAD_MAGIC) || data.starts_with(OPUS_TAGS_MAGIC)
    }
}

impl Iterator for OggPacketReader {
    type Item = Result<Bytes, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(PipelineError::decode_format(&self.origin, e)));
                }
            };

            if packet.track_id() != self.track_id || Self::is_header_packet(packet.buf()) {
                continue;
            }

            return Some(Ok(Bytes::copy_from_slice(packet.buf())));
        }

        None
    }
}
