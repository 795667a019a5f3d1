//! Outgoing audio queue of a voice connection.
//!
//! Holds PCM that has been sent but not yet played, interleaved with track
//! markers. The audio thread pulls samples at its own pace; markers are
//! consumed as playback passes them.

use crate::sources::Sample;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;

#[derive(Debug)]
enum QueueItem {
    Audio(Vec<Sample>),
    Marker(String),
}

#[derive(Debug, Default)]
pub struct VoiceQueue {
    items: VecDeque<QueueItem>,
    /// Samples already played from the front audio item
    front_offset: usize,
    queued_samples: usize,
}

impl VoiceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues s16le stereo PCM bytes. A trailing partial frame is dropped.
    pub fn push_pcm(&mut self, pcm: &[u8]) {
        let samples: Vec<Sample> = pcm
            .chunks_exact(4)
            .map(|frame| {
                (
                    LittleEndian::read_i16(&frame[0..2]),
                    LittleEndian::read_i16(&frame[2..4]),
                )
            })
            .collect();

        self.push_samples(samples);
    }

    pub fn push_samples(&mut self, samples: Vec<Sample>) {
        if samples.is_empty() {
            return;
        }

        self.queued_samples += samples.len();
        self.items.push_back(QueueItem::Audio(samples));
    }

    pub fn push_marker(&mut self, tag: impl Into<String>) {
        self.items.push_back(QueueItem::Marker(tag.into()));
    }

    /// Pops up to `count` samples, padding with silence. Markers reached on
    /// the way are consumed and returned in order.
    pub fn pull_samples(&mut self, count: usize) -> (Vec<Sample>, Vec<String>) {
        let mut samples = Vec::with_capacity(count);
        let mut passed_markers = vec![];

        while samples.len() < count {
            match self.items.front() {
                Some(QueueItem::Marker(_)) => {
                    if let Some(QueueItem::Marker(tag)) = self.items.pop_front() {
                        passed_markers.push(tag);
                    }
                }
                Some(QueueItem::Audio(audio)) => {
                    let available = audio.len() - self.front_offset;
                    let to_read = available.min(count - samples.len());

                    samples.extend_from_slice(
                        &audio[self.front_offset..self.front_offset + to_read],
                    );
                    self.front_offset += to_read;
                    self.queued_samples -= to_read;

                    if self.front_offset == audio.len() {
                        self.items.pop_front();
                        self.front_offset = 0;
                    }
                }
                None => break,
            }
        }

        // Markers right behind the last played sample belong to this pull
        while let Some(QueueItem::Marker(_)) = self.items.front() {
            if let Some(QueueItem::Marker(tag)) = self.items.pop_front() {
                passed_markers.push(tag);
            }
        }

        samples.resize(count, (0, 0));

        (samples, passed_markers)
    }

    /// Drops queued audio up to and including the next marker and returns
    /// its tag. Returns None, leaving the queue untouched, if no marker is
    /// queued.
    pub fn skip_to_next_marker(&mut self) -> Option<String> {
        if self.tracks_remaining() == 0 {
            return None;
        }

        while let Some(item) = self.items.pop_front() {
            match item {
                QueueItem::Audio(audio) => {
                    self.queued_samples -= audio.len() - self.front_offset;
                    self.front_offset = 0;
                }
                QueueItem::Marker(tag) => return Some(tag),
            }
        }

        None
    }

    pub fn tracks_remaining(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, QueueItem::Marker(_)))
            .count()
    }

    /// Samples waiting to be played
    pub fn queued_samples(&self) -> usize {
        self.queued_samples
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.front_offset = 0;
        self.queued_samples = 0;
    }
}

/// Convert i16 stereo samples to f32 bytes directly into output buffer
pub fn samples_to_f32_bytes_into(samples: &[Sample], buf: &mut [u8]) -> usize {
    let mut offset = 0;
    for (left, right) in samples {
        if offset + 8 > buf.len() {
            break;
        }

        let left_f32 = *left as f32 / 32768.0;
        let right_f32 = *right as f32 / 32768.0;

        LittleEndian::write_f32(&mut buf[offset..offset + 4], left_f32);
        LittleEndian::write_f32(&mut buf[offset + 4..offset + 8], right_f32);
        offset += 8;
    }
    offset
}
