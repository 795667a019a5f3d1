//! Byte buffer holding one track's audio for the duration of a playback.
//!
//! Decoders fill it, the scheduler consumes it by value.

use crate::constants::{CHANNELS, SAMPLE_RATE};
use std::io::Read;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioKind {
    /// Interleaved signed 16-bit little-endian PCM
    Pcm { sample_rate: u32, channels: u16 },
    /// Unparsed bytes of an Ogg/Opus file
    OggContainer,
}

impl AudioKind {
    pub fn transport_pcm() -> Self {
        AudioKind::Pcm {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AudioBuffer {
    kind: AudioKind,
    bytes: Vec<u8>,
}

impl AudioBuffer {
    pub fn with_capacity(kind: AudioKind, reserve: usize) -> Self {
        Self {
            kind,
            bytes: Vec::with_capacity(reserve),
        }
    }

    pub fn from_bytes(kind: AudioKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// Drops all content but keeps the allocation for the next load.
    pub fn reset(&mut self, kind: AudioKind) {
        self.kind = kind;
        self.bytes.clear();
    }

    /// Appends a whole decoder output block. A short `valid` prefix is
    /// zero-padded to the block length.
    pub fn push_block(&mut self, block: &[u8], valid: usize) {
        let valid = valid.min(block.len());
        self.bytes.extend_from_slice(&block[..valid]);
        self.bytes.resize(self.bytes.len() + (block.len() - valid), 0);
    }

    /// Appends everything `reader` yields straight into the buffer, growing
    /// it up front to fit `size_hint` more bytes.
    pub fn read_from(
        &mut self,
        reader: &mut impl Read,
        size_hint: usize,
    ) -> std::io::Result<usize> {
        self.bytes.reserve(size_hint);
        reader.read_to_end(&mut self.bytes)
    }

    pub fn kind(&self) -> AudioKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of `chunk_size` chunks needed to send the whole buffer.
    pub fn chunk_count(&self, chunk_size: usize) -> usize {
        if chunk_size == 0 {
            return 0;
        }
        self.bytes.len().div_ceil(chunk_size)
    }

    /// Playback length in seconds, for PCM buffers only.
    pub fn duration_secs(&self) -> Option<f64> {
        match self.kind {
            AudioKind::Pcm {
                sample_rate,
                channels,
            } if sample_rate > 0 && channels > 0 => {
                let frames = self.bytes.len() / (2 * channels as usize);
                Some(frames as f64 / sample_rate as f64)
            }
            _ => None,
        }
    }
}
