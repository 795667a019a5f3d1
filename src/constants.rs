use std::time::Duration;

// Audio format expected by the voice transport
pub const SAMPLE_RATE: u32 = 48000; // 48 kHz sample rate
pub const BIT_DEPTH: u16 = 16; // 16 bits per sample
pub const CHANNELS: u16 = 2; // Stereo channel

/// Bytes per interleaved stereo frame (2 channels * 16 bits)
pub const BYTES_PER_FRAME: usize = (CHANNELS as usize) * (BIT_DEPTH as usize / 8);

/// Size of one decoder output block: 1152 frames, the length of an MPEG-1
/// Layer III frame, at 16-bit stereo.
pub const DECODE_BLOCK_SIZE: usize = 1152 * BYTES_PER_FRAME;

/// Raw PCM bytes sent per transport call: 60 ms of audio at 48 kHz stereo.
pub const IDEAL_CHUNK_SIZE: usize = 11520;

/// Initial capacity reserved for an audio buffer.
pub const DEFAULT_BUFFER_RESERVE: usize = 5 * 1024 * 1024;

pub const READINESS_TIMEOUT: Duration = Duration::from_secs(3);
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_CACHE_DIR: &str = "data";
pub const DEFAULT_YT_DLP_PATH: &str = "./yt-dlp";
