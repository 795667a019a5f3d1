//! Drains an [`AudioBuffer`] into a [`VoiceSession`].
//!
//! PCM buffers go out in fixed-size chunks, Ogg buffers packet by packet.
//! Nothing is sent before the session reports ready. When readiness is lost
//! mid-stream the scheduler waits for it again (bounded by the same timeout)
//! and stops the stream if it does not come back; chunks are never silently
//! dropped. A marker tagged with the track's cache path follows the last
//! chunk or packet.

use crate::{
    buffer::{AudioBuffer, AudioKind},
    config::PipelineConfig,
    constants::{IDEAL_CHUNK_SIZE, READINESS_POLL_INTERVAL, READINESS_TIMEOUT},
    error::PipelineError,
    sources::ogg::OggPacketReader,
    transport::VoiceSession,
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// PCM bytes per `send_raw_pcm` call
    pub chunk_size: usize,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chunk_size: IDEAL_CHUNK_SIZE,
            readiness_timeout: READINESS_TIMEOUT,
            readiness_poll_interval: READINESS_POLL_INTERVAL,
        }
    }
}

impl From<&PipelineConfig> for SchedulerConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            readiness_timeout: config.readiness_timeout(),
            readiness_poll_interval: config.readiness_poll_interval(),
        }
    }
}

/// Outcome of one streaming pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Chunks or packets accepted by the transport
    pub sent: usize,
    /// Chunks or packets the transport rejected
    pub failed: usize,
    /// Chunks in the buffer, or packets read from the container
    pub total: usize,
    /// Buffer bytes covered by the loop
    pub processed_bytes: usize,
    /// Readiness was lost (or the container broke off) before the end
    pub stopped_early: bool,
}

/// Progress of one pass, alive only inside the send loop.
#[derive(Default)]
struct StreamCursor {
    processed: usize,
    sent: usize,
    failed: usize,
    total: usize,
}

impl StreamCursor {
    fn record(&mut self, result: anyhow::Result<()>, len: usize) {
        self.processed += len;
        match result {
            Ok(()) => self.sent += 1,
            Err(e) => {
                trace!("Transport rejected {len} bytes: {e:?}");
                self.failed += 1;
            }
        }
    }

    fn finish(self, stopped_early: bool) -> StreamSummary {
        StreamSummary {
            sent: self.sent,
            failed: self.failed,
            total: self.total,
            processed_bytes: self.processed,
            stopped_early,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StreamScheduler {
    config: SchedulerConfig,
}

impl StreamScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Polls `session` until it is ready, giving up after the readiness
    /// timeout.
    pub async fn wait_until_ready(
        &self,
        session: &dyn VoiceSession,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let start = Instant::now();
        let timeout = self.config.readiness_timeout;
        let poll_interval = self.config.readiness_poll_interval.max(MIN_POLL_INTERVAL);

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            if session.is_ready().await {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(PipelineError::TransportNotReady {
                    waited_ms: elapsed.as_millis(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(poll_interval.min(timeout - elapsed)) => {}
            }
        }
    }

    /// Streams the whole buffer, then inserts a marker tagged `marker_tag`.
    ///
    /// Fails without sending anything if the session does not become ready
    /// in time. Cancellation stops the stream without a marker.
    pub async fn stream(
        &self,
        buffer: AudioBuffer,
        session: &dyn VoiceSession,
        marker_tag: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary, PipelineError> {
        self.wait_until_ready(session, cancel).await?;

        let summary = match buffer.kind() {
            AudioKind::Pcm { .. } => self.stream_pcm(buffer, session, cancel).await?,
            AudioKind::OggContainer => {
                self.stream_packets(buffer, session, marker_tag, cancel)
                    .await?
            }
        };

        session.insert_marker(marker_tag).await;

        info!(
            "Streamed {marker_tag}: {}/{} sent, {} failed{}",
            summary.sent,
            summary.total,
            summary.failed,
            if summary.stopped_early {
                " (stopped early, transport not ready)"
            } else {
                ""
            }
        );

        Ok(summary)
    }

    /// Returns whether streaming may continue, waiting for lost readiness to
    /// come back.
    async fn keep_streaming(
        &self,
        session: &dyn VoiceSession,
        cancel: &CancellationToken,
    ) -> Result<bool, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if session.is_ready().await {
            return Ok(true);
        }

        debug!("Voice transport lost readiness, waiting");

        match self.wait_until_ready(session, cancel).await {
            Ok(()) => Ok(true),
            Err(PipelineError::TransportNotReady { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stream_pcm(
        &self,
        buffer: AudioBuffer,
        session: &dyn VoiceSession,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary, PipelineError> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut cursor = StreamCursor {
            total: buffer.chunk_count(chunk_size),
            ..Default::default()
        };

        for chunk in buffer.as_bytes().chunks(chunk_size) {
            if !self.keep_streaming(session, cancel).await? {
                return Ok(cursor.finish(true));
            }

            let result = session.send_raw_pcm(chunk).await;
            cursor.record(result, chunk.len());

            tokio::task::yield_now().await;
        }

        Ok(cursor.finish(false))
    }

    async fn stream_packets(
        &self,
        buffer: AudioBuffer,
        session: &dyn VoiceSession,
        origin: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary, PipelineError> {
        let packets = OggPacketReader::new(buffer.into_bytes(), origin)?;
        let mut cursor = StreamCursor::default();

        for packet in packets {
            let packet = match packet {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Ending stream of {origin} on container error: {e}");
                    return Ok(cursor.finish(true));
                }
            };

            cursor.total += 1;

            if !self.keep_streaming(session, cancel).await? {
                return Ok(cursor.finish(true));
            }

            let result = session.send_opus_packet(&packet).await;
            cursor.record(result, packet.len());

            tokio::task::yield_now().await;
        }

        Ok(cursor.finish(false))
    }
}
