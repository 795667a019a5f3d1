//! Seams to the voice transport and the chat platform.
//!
//! The pipeline only talks to these traits. The Discord implementation lives
//! in the `discord` module, tests provide in-memory doubles.

use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

pub type GuildId = u64;
pub type ChannelId = u64;
pub type UserId = u64;

/// One guild's live voice connection. Owned by the gateway, the pipeline only
/// borrows it for sending.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Whether audio sent now would reach the voice channel
    async fn is_ready(&self) -> bool;

    /// Queues interleaved s16le 48 kHz stereo PCM.
    async fn send_raw_pcm(&self, pcm: &[u8]) -> Result<()>;

    /// Queues one pre-encoded Opus packet.
    async fn send_opus_packet(&self, packet: &[u8]) -> Result<()>;

    /// Marks the end of a track in the outgoing stream.
    async fn insert_marker(&self, tag: &str);

    /// Drops queued audio up to and including the next marker.
    /// Returns false when there was no marker to skip to.
    async fn skip_to_next_marker(&self) -> bool;

    /// Markers still queued, i.e. tracks not yet fully played.
    async fn tracks_remaining(&self) -> usize;
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Connects to the voice channel `user` is currently in. Returns false if
    /// the user is not in a voice channel or the connection failed.
    async fn connect_member(&self, guild_id: GuildId, user_id: UserId) -> bool;

    async fn session(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceSession>>;

    /// Returns false if there was no connection to close.
    async fn disconnect(&self, guild_id: GuildId) -> bool;

    /// Posts a plain text message to a chat channel.
    async fn notify(&self, channel_id: ChannelId, text: &str);
}

/// Live sessions by guild.
///
/// A guild keeps its session until it is removed: joining again (e.g. moving
/// to another channel) must not orphan the session an in-flight playback is
/// still sending to.
pub struct SessionSlots<S> {
    sessions: Mutex<HashMap<GuildId, Arc<S>>>,
}

impl<S> Default for SessionSlots<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> SessionSlots<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<GuildId, Arc<S>>> {
        match self.sessions.lock() {
            Ok(slots) => slots,
            Err(e) => e.into_inner(),
        }
    }

    /// Returns the guild's session, creating it with `create` if there is
    /// none. The flag is true when a new session was created.
    pub fn get_or_insert_with(
        &self,
        guild_id: GuildId,
        create: impl FnOnce() -> S,
    ) -> (Arc<S>, bool) {
        let mut slots = self.slots();

        if let Some(session) = slots.get(&guild_id) {
            return (session.clone(), false);
        }

        let session = Arc::new(create());
        slots.insert(guild_id, session.clone());
        (session, true)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<S>> {
        self.slots().get(&guild_id).cloned()
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<S>> {
        self.slots().remove(&guild_id)
    }
}
