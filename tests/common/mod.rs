//! Test infrastructure for discord-tunes-rs integration tests.
//!
//! Provides in-memory voice transport doubles, a stub media fetcher, audio
//! fixture builders and event helpers, so the pipeline can be tested without
//! Discord or yt-dlp.

#![allow(dead_code)]

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::broadcast::error::TryRecvError;

// Re-export key types from the main crate
pub use discord_tunes_rs::buffer::{AudioBuffer, AudioKind};
pub use discord_tunes_rs::config::{Config, FetchPolicy, PipelineConfig};
pub use discord_tunes_rs::error::PipelineError;
pub use discord_tunes_rs::event::{Event, EventBus, PlaybackEvent, Subscriber};
pub use discord_tunes_rs::fetcher::MediaFetcher;
pub use discord_tunes_rs::playback::{Pipeline, PlaybackRegistry};
pub use discord_tunes_rs::resolver::{Format, MediaRequest, UrlResolver};
pub use discord_tunes_rs::scheduler::{SchedulerConfig, StreamScheduler, StreamSummary};
pub use discord_tunes_rs::session::{InboundMessage, SessionHandler};
pub use discord_tunes_rs::transport::{VoiceGateway, VoiceSession};

pub const GUILD: u64 = 100;
pub const TEXT_CHANNEL: u64 = 200;
pub const USER_IN_VOICE: u64 = 300;
pub const USER_NOT_IN_VOICE: u64 = 301;

/// Pipeline settings with short readiness timings and `cache_dir`.
pub fn test_pipeline_config(cache_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        cache_dir: cache_dir.to_path_buf(),
        buffer_reserve_bytes: 64 * 1024,
        readiness_timeout_ms: 60,
        readiness_poll_interval_ms: 5,
        ..Default::default()
    }
}

pub fn test_scheduler_config(chunk_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        chunk_size,
        readiness_timeout: Duration::from_millis(60),
        readiness_poll_interval: Duration::from_millis(5),
    }
}

// ============================================================================
// Voice transport doubles
// ============================================================================

/// Everything the pipeline did to a [`MockVoiceSession`], in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCall {
    Pcm(Vec<u8>),
    Opus(Vec<u8>),
    Marker(String),
}

#[derive(Default)]
pub struct MockVoiceSession {
    ready: AtomicBool,
    reject_sends: AtomicBool,
    /// Readiness is dropped once this many sends have been made
    revoke_after: Mutex<Option<usize>>,
    sends: AtomicUsize,
    ready_checks: AtomicUsize,
    skipped: AtomicUsize,
    calls: Mutex<Vec<SessionCall>>,
}

impl MockVoiceSession {
    pub fn ready() -> Arc<Self> {
        let session = Self::default();
        session.ready.store(true, Ordering::SeqCst);
        Arc::new(session)
    }

    pub fn not_ready() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn revoke_after(&self, sends: usize) {
        *self.revoke_after.lock().unwrap() = Some(sends);
    }

    pub fn reject_sends(&self) {
        self.reject_sends.store(true, Ordering::SeqCst);
    }

    pub fn ready_checks(&self) -> usize {
        self.ready_checks.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn pcm_chunks(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Pcm(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    pub fn opus_packets(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Opus(packet) => Some(packet),
                _ => None,
            })
            .collect()
    }

    pub fn markers(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SessionCall::Marker(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    fn record_send(&self, call: SessionCall) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        let sends = self.sends.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(limit) = *self.revoke_after.lock().unwrap() {
            if sends >= limit {
                self.set_ready(false);
            }
        }

        if self.reject_sends.load(Ordering::SeqCst) {
            anyhow::bail!("transport rejected send");
        }

        Ok(())
    }
}

#[async_trait]
impl VoiceSession for MockVoiceSession {
    async fn is_ready(&self) -> bool {
        self.ready_checks.fetch_add(1, Ordering::SeqCst);
        self.ready.load(Ordering::SeqCst)
    }

    async fn send_raw_pcm(&self, pcm: &[u8]) -> anyhow::Result<()> {
        self.record_send(SessionCall::Pcm(pcm.to_vec()))
    }

    async fn send_opus_packet(&self, packet: &[u8]) -> anyhow::Result<()> {
        self.record_send(SessionCall::Opus(packet.to_vec()))
    }

    async fn insert_marker(&self, tag: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(SessionCall::Marker(tag.to_string()));
    }

    async fn skip_to_next_marker(&self) -> bool {
        if self.tracks_remaining().await == 0 {
            return false;
        }
        self.skipped.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn tracks_remaining(&self) -> usize {
        self.markers()
            .len()
            .saturating_sub(self.skipped.load(Ordering::SeqCst))
    }
}

/// Gateway where a fixed set of users sit in voice channels.
#[derive(Default)]
pub struct MockGateway {
    members_in_voice: HashSet<u64>,
    sessions: Mutex<HashMap<u64, Arc<MockVoiceSession>>>,
    notices: Mutex<Vec<(u64, String)>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members_in_voice: HashSet::from([USER_IN_VOICE]),
            ..Default::default()
        })
    }

    /// Installs `session` as the guild's connection without `.join`.
    pub fn attach(&self, guild_id: u64, session: Arc<MockVoiceSession>) {
        self.sessions.lock().unwrap().insert(guild_id, session);
    }

    pub fn mock_session(&self, guild_id: u64) -> Option<Arc<MockVoiceSession>> {
        self.sessions.lock().unwrap().get(&guild_id).cloned()
    }

    pub fn notices(&self) -> Vec<(u64, String)> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceGateway for MockGateway {
    async fn connect_member(&self, guild_id: u64, user_id: u64) -> bool {
        if !self.members_in_voice.contains(&user_id) {
            return false;
        }

        self.sessions
            .lock()
            .unwrap()
            .entry(guild_id)
            .or_insert_with(MockVoiceSession::ready);
        true
    }

    async fn session(&self, guild_id: u64) -> Option<Arc<dyn VoiceSession>> {
        self.mock_session(guild_id)
            .map(|session| session as Arc<dyn VoiceSession>)
    }

    async fn disconnect(&self, guild_id: u64) -> bool {
        self.sessions.lock().unwrap().remove(&guild_id).is_some()
    }

    async fn notify(&self, channel_id: u64, text: &str) {
        self.notices
            .lock()
            .unwrap()
            .push((channel_id, text.to_string()));
    }
}

// ============================================================================
// Fetcher double
// ============================================================================

/// Writes a fixture file instead of downloading anything.
pub struct StubFetcher {
    mp3: Option<Vec<u8>>,
    opus: Option<Vec<u8>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubFetcher {
    /// Serves the default fixtures for both formats.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mp3: Some(silent_mp3(20, Mp3Rate::Hz48000)),
            opus: Some(ogg_opus_file(&opus_packets(10))),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    /// Pretends to run but never produces a file.
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            mp3: None,
            opus: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    /// Serves the default fixtures after sleeping for `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mp3: Some(silent_mp3(20, Mp3Rate::Hz48000)),
            opus: Some(ogg_opus_file(&opus_packets(10))),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for StubFetcher {
    async fn fetch(&self, _url: &str, format: Format, path: &Path) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fixture = match format.resolved() {
            Format::Mp3 => &self.mp3,
            _ => &self.opus,
        };

        if let Some(bytes) = fixture {
            tokio::fs::write(path, bytes).await.unwrap();
        }

        Ok(())
    }
}

/// Everything an end-to-end test needs, wired the way the bot wires it.
pub struct TestBot {
    pub cache_dir: tempfile::TempDir,
    pub bus: EventBus,
    pub gateway: Arc<MockGateway>,
    pub fetcher: Arc<StubFetcher>,
    pub handler: SessionHandler,
}

impl TestBot {
    pub fn new() -> Self {
        Self::with_fetcher(StubFetcher::new())
    }

    pub fn with_fetcher(fetcher: Arc<StubFetcher>) -> Self {
        let cache_dir = tempfile::TempDir::new().unwrap();
        let bus = EventBus::new();
        let gateway = MockGateway::new();

        let pipeline = Arc::new(Pipeline::new(
            test_pipeline_config(cache_dir.path()),
            UrlResolver::default(),
            fetcher.clone(),
        ));
        let registry = Arc::new(PlaybackRegistry::new(
            pipeline,
            gateway.clone(),
            bus.clone(),
        ));
        let handler = SessionHandler::new(gateway.clone(), registry, bus.clone());

        Self {
            cache_dir,
            bus,
            gateway,
            fetcher,
            handler,
        }
    }

    pub fn cache_path(&self, file_name: &str) -> PathBuf {
        self.cache_dir.path().join(file_name)
    }

    /// Delivers `content` as a message from `author_id`.
    pub async fn say(&self, author_id: u64, content: &str) {
        self.handler
            .handle(&InboundMessage {
                guild_id: GUILD,
                channel_id: TEXT_CHANNEL,
                author_id,
                content: content.to_string(),
            })
            .await;
    }
}

// ============================================================================
// Audio fixtures
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub enum Mp3Rate {
    Hz44100,
    Hz48000,
}

/// An MPEG-1 Layer III stream of `frames` silent 128 kbps joint stereo
/// frames. Every frame has empty side info, so each decodes to 1152 samples
/// of silence.
pub fn silent_mp3(frames: usize, rate: Mp3Rate) -> Vec<u8> {
    let (rate_bits, frame_len) = match rate {
        // 144 * 128000 / 44100, unpadded
        Mp3Rate::Hz44100 => (0x90, 417),
        Mp3Rate::Hz48000 => (0x94, 384),
    };

    let mut frame = vec![0u8; frame_len];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, rate_bits, 0x64]);

    frame.repeat(frames)
}

/// Distinct fake Opus packets: a 20 ms CELT stereo TOC byte plus payload.
pub fn opus_packets(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let mut packet = vec![0xFC];
            packet.extend((0..40).map(|j| (i * 7 + j) as u8));
            packet
        })
        .collect()
}

fn ogg_crc(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for byte in data {
        crc ^= (*byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04c1_1db7
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// One Ogg page holding `packets`, each shorter than 255 bytes.
fn ogg_page(flags: u8, granule: i64, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let mut page = Vec::new();
    page.extend_from_slice(b"OggS");
    page.push(0); // version
    page.push(flags);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&0x5EED_u32.to_le_bytes()); // serial
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0; 4]); // checksum, filled below
    page.push(packets.len() as u8);
    for packet in packets {
        assert!(packet.len() < 255);
        page.push(packet.len() as u8);
    }
    for packet in packets {
        page.extend_from_slice(packet);
    }

    let crc = ogg_crc(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

/// An Ogg/Opus file: OpusHead page, OpusTags page, then all `packets` on
/// one final page.
pub fn ogg_opus_file(packets: &[Vec<u8>]) -> Vec<u8> {
    const PRE_SKIP: u16 = 312;

    let mut head = Vec::new();
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(2); // channels
    head.extend_from_slice(&PRE_SKIP.to_le_bytes());
    head.extend_from_slice(&48000u32.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes()); // output gain
    head.push(0); // channel mapping family

    let mut tags = Vec::new();
    tags.extend_from_slice(b"OpusTags");
    let vendor = b"discord-tunes-rs tests";
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor);
    tags.extend_from_slice(&0u32.to_le_bytes()); // no comments

    let audio: Vec<&[u8]> = packets.iter().map(|p| p.as_slice()).collect();
    let granule = PRE_SKIP as i64 + 960 * packets.len() as i64;

    let mut file = ogg_page(0x02, 0, 0, &[&head]);
    file.extend(ogg_page(0x00, 0, 1, &[&tags]));
    file.extend(ogg_page(0x04, granule, 2, &audio));
    file
}

pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

// ============================================================================
// Events
// ============================================================================

/// Collects all events from a subscriber within a timeout period.
/// Returns events in the order they were received.
pub async fn collect_events(subscriber: &mut Subscriber, timeout: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match subscriber.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(TryRecvError::Lagged(n)) => {
                eprintln!("Warning: subscriber lagged, missed {n} events");
            }
            Err(TryRecvError::Closed) => break,
        }
    }

    events
}

/// Waits for a specific type of event within a timeout.
pub async fn wait_for_event<F>(
    subscriber: &mut Subscriber,
    timeout: Duration,
    matches: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match subscriber.try_recv() {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return None,
        }
    }
}

pub fn is_finished(event: &Event) -> bool {
    matches!(event, Event::Playback(PlaybackEvent::Finished { .. }))
}

pub fn is_failed(event: &Event) -> bool {
    matches!(event, Event::Playback(PlaybackEvent::Failed { .. }))
}

pub fn is_done(event: &Event) -> bool {
    is_finished(event) || is_failed(event)
}

/// Asserts that a specific event type was received.
#[macro_export]
macro_rules! assert_event_received {
    ($events:expr, $pattern:pat) => {
        assert!(
            $events.iter().any(|e| matches!(e, $pattern)),
            "Expected event matching {} not found in {:?}",
            stringify!($pattern),
            $events
        );
    };
}

/// Asserts that a specific event type was NOT received.
#[macro_export]
macro_rules! assert_event_not_received {
    ($events:expr, $pattern:pat) => {
        assert!(
            !$events.iter().any(|e| matches!(e, $pattern)),
            "Unexpected event matching {} found in {:?}",
            stringify!($pattern),
            $events
        );
    };
}
