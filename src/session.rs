//! Chat command dispatch.
//!
//! Each inbound message is handled on its own; the only state lives in the
//! playback registry and in the voice gateway.

use crate::{
    event::{Event, EventBus, PlaybackEvent},
    playback::PlaybackRegistry,
    resolver::{Format, MediaRequest},
    transport::{ChannelId, GuildId, UserId, VoiceGateway},
};
use std::sync::Arc;

pub const NOT_IN_VOICE_CHANNEL: &str = "You don't seem to be on a voice channel! :(";
pub const PLAY_USAGE: &str = "Usage: .play <url> [mp3|opus]";

/// A chat message as delivered by the dispatcher.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Join the author's voice channel
    Join,

    /// Fetch and stream a URL; `format` is the raw optional format argument
    Play {
        url: Option<String>,
        format: Option<String>,
    },

    /// Skip to the next track marker
    Skip,

    /// Stop playback and leave the voice channel
    Leave,
}

impl Command {
    /// Parses a message. Returns None for anything that is not a command.
    pub fn parse(text: &str) -> Option<Command> {
        // Create an iterator over the words in the message
        let mut cmd_split = text.split_whitespace();

        // Advance the iterator by one to get the first word as the command
        let cmd = cmd_split.next()?;

        match cmd {
            ".join" => Some(Command::Join),
            ".play" => Some(Command::Play {
                url: cmd_split.next().map(|s| s.to_string()),
                format: cmd_split.next().map(|s| s.to_string()),
            }),
            ".skip" => Some(Command::Skip),
            ".leave" => Some(Command::Leave),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SessionHandler {
    gateway: Arc<dyn VoiceGateway>,
    playback: Arc<PlaybackRegistry>,
    bus: EventBus,
}

impl SessionHandler {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        playback: Arc<PlaybackRegistry>,
        bus: EventBus,
    ) -> Self {
        Self {
            gateway,
            playback,
            bus,
        }
    }

    pub fn playback(&self) -> &Arc<PlaybackRegistry> {
        &self.playback
    }

    /// Handles one message. Never fails: errors are logged and, where the
    /// user can fix them, answered in chat.
    pub async fn handle(&self, message: &InboundMessage) {
        let Some(command) = Command::parse(&message.content) else {
            return;
        };

        debug!(
            "Command from user {} in guild {}: {:?}",
            message.author_id, message.guild_id, command
        );

        match command {
            Command::Join => self.join(message).await,
            Command::Play { url, format } => self.play(message, url, format).await,
            Command::Skip => self.skip(message.guild_id).await,
            Command::Leave => self.leave(message.guild_id).await,
        }
    }

    async fn join(&self, message: &InboundMessage) {
        let connected = self
            .gateway
            .connect_member(message.guild_id, message.author_id)
            .await;

        if connected {
            info!(
                "Joined voice channel of user {} in guild {}",
                message.author_id, message.guild_id
            );
        } else {
            self.gateway
                .notify(message.channel_id, NOT_IN_VOICE_CHANNEL)
                .await;
        }
    }

    async fn play(&self, message: &InboundMessage, url: Option<String>, format: Option<String>) {
        let Some(url) = url else {
            self.gateway.notify(message.channel_id, PLAY_USAGE).await;
            return;
        };

        let format = match Format::parse(format.as_deref()) {
            Ok(format) => format,
            Err(e) => {
                error!("Rejecting .play {url}: {e}");
                self.bus.send(Event::Playback(PlaybackEvent::Failed {
                    guild_id: message.guild_id,
                    url,
                    error: e.to_string(),
                }));
                return;
            }
        };

        self.playback
            .enqueue(message.guild_id, MediaRequest::new(url, format));
    }

    async fn skip(&self, guild_id: GuildId) {
        let Some(session) = self.gateway.session(guild_id).await else {
            debug!("Ignoring .skip in guild {guild_id}: no voice connection");
            return;
        };

        if session.skip_to_next_marker().await {
            info!(
                "Skipped track in guild {guild_id}, {} remaining",
                session.tracks_remaining().await
            );
            self.bus
                .send(Event::Playback(PlaybackEvent::Skipped { guild_id }));
        } else {
            debug!("Nothing to skip in guild {guild_id}");
        }
    }

    async fn leave(&self, guild_id: GuildId) {
        let stopped = self.playback.stop(guild_id);
        let disconnected = self.gateway.disconnect(guild_id).await;

        if stopped || disconnected {
            info!("Left guild {guild_id} (playback stopped: {stopped})");
        }
    }
}
