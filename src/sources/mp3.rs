//! MP3 to 48 kHz stereo PCM decoding.

use crate::{
    buffer::{AudioBuffer, AudioKind},
    constants::{BYTES_PER_FRAME, DECODE_BLOCK_SIZE},
    error::PipelineError,
    sources::{Sample, OUTPUT_SAMPLE_RATE},
};
use byteorder::{ByteOrder, LittleEndian};
use itertools::Itertools;
use rubato::{FftFixedIn, Resampler};
use std::{fs::File, path::Path};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Decodes the MP3 file at `path` into `buffer` as interleaved s16le stereo
/// PCM at [`OUTPUT_SAMPLE_RATE`].
///
/// The buffer is filled in whole [`DECODE_BLOCK_SIZE`] blocks, so the last
/// block carries trailing silence past the final decoded sample.
pub fn decode_file(path: &Path, buffer: &mut AudioBuffer) -> Result<(), PipelineError> {
    buffer.reset(AudioKind::transport_pcm());

    let (samples, native_rate) = decode_samples(path)?;

    let samples = if native_rate == OUTPUT_SAMPLE_RATE {
        samples
    } else {
        debug!(
            "Resampling {} from {native_rate} Hz to {OUTPUT_SAMPLE_RATE} Hz",
            path.display()
        );
        resample(&samples, native_rate)?
    };

    write_blocks(&samples, buffer);

    debug!(
        "Decoded {} into {} bytes of PCM ({:.1} s)",
        path.display(),
        buffer.len(),
        buffer.duration_secs().unwrap_or_default()
    );

    Ok(())
}

/// Decodes every packet of the default track into stereo samples.
/// Returns the samples and the stream's native sample rate.
fn decode_samples(path: &Path) -> Result<(Vec<Sample>, u32), PipelineError> {
    let file = File::open(path).map_err(|source| PipelineError::DecodeOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let format_opts: FormatOptions = Default::default();
    let metadata_opts: MetadataOptions = Default::default();
    let decoder_opts: DecoderOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| PipelineError::decode_format(path, e))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| PipelineError::decode_format(path, "no audio track found"))?;

    let native_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::decode_format(path, "unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| PipelineError::decode_format(path, e))?;

    let track_id = track.id;

    let mut samples: Vec<Sample> = Vec::new();
    let mut sample_buf = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // Symphonia reports the regular end of stream as UnexpectedEof
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(PipelineError::decode_format(path, e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt MP3 frame in {}: {e}", path.display());
                continue;
            }
            Err(e) => return Err(PipelineError::decode_format(path, e)),
        };

        let channels = audio_buf.spec().channels.count();

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<i16>::new(audio_buf.capacity() as u64, *audio_buf.spec())
        });
        buf.copy_interleaved_ref(audio_buf);

        match channels {
            0 => {}
            1 => samples.extend(buf.samples().iter().map(|s| (*s, *s))),
            2 => samples.extend(buf.samples().iter().copied().tuples::<Sample>()),
            n => samples.extend(buf.samples().chunks_exact(n).map(|frame| (frame[0], frame[1]))),
        }
    }

    Ok((samples, native_rate))
}

/// Resamples stereo samples from `native_rate` to [`OUTPUT_SAMPLE_RATE`].
fn resample(input: &[Sample], native_rate: u32) -> Result<Vec<Sample>, PipelineError> {
    if input.is_empty() {
        return Ok(vec![]);
    }

    let mut resampler = FftFixedIn::<f64>::new(
        native_rate as usize,
        OUTPUT_SAMPLE_RATE as usize,
        RESAMPLER_CHUNK_SIZE,
        2, // sub-chunks
        2, // stereo
    )
    .map_err(|e| PipelineError::decode_format("resampler", e))?;

    let left: Vec<f64> = input.iter().map(|s| s.0 as f64 / 32768.0).collect();
    let right: Vec<f64> = input.iter().map(|s| s.1 as f64 / 32768.0).collect();

    let chunk_size = resampler.input_frames_max();
    let expected_len =
        (input.len() as u64 * OUTPUT_SAMPLE_RATE as u64 / native_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected_len + chunk_size);

    for chunk_start in (0..input.len()).step_by(chunk_size) {
        let chunk_end = (chunk_start + chunk_size).min(input.len());

        // Pad last chunk with silence
        let chunk: Vec<Vec<f64>> = [&left, &right]
            .iter()
            .map(|ch| {
                let mut ch = ch[chunk_start..chunk_end].to_vec();
                ch.resize(chunk_size, 0.0);
                ch
            })
            .collect();

        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| PipelineError::decode_format("resampler", e))?;

        let to_i16 = |s: f64| (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        output.extend(
            resampled[0]
                .iter()
                .zip(resampled[1].iter())
                .map(|(l, r)| (to_i16(*l), to_i16(*r))),
        );
    }

    Ok(output)
}

/// Serializes samples as s16le and appends them in whole decoder blocks.
fn write_blocks(samples: &[Sample], buffer: &mut AudioBuffer) {
    let frames_per_block = DECODE_BLOCK_SIZE / BYTES_PER_FRAME;
    let mut block = [0u8; DECODE_BLOCK_SIZE];

    for frames in samples.chunks(frames_per_block) {
        for (i, (left, right)) in frames.iter().enumerate() {
            let offset = i * BYTES_PER_FRAME;
            LittleEndian::write_i16(&mut block[offset..offset + 2], *left);
            LittleEndian::write_i16(&mut block[offset + 2..offset + 4], *right);
        }

        buffer.push_block(&block, frames.len() * BYTES_PER_FRAME);
    }
}
