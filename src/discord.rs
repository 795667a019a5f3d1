//! Discord front end.
//!
//! - Text commands (`.join`, `.play`, `.skip`, `.leave`) read from guild messages
//! - Voice transport backed by songbird: one live track per call, fed from a
//!   [`VoiceQueue`] of PCM and track markers
//! - A `/ping` slash command

use crate::{
    config::{Config, DiscordConfig},
    constants::{CHANNELS, SAMPLE_RATE},
    event::EventBus,
    fetcher::YtDlpFetcher,
    playback::{Pipeline, PlaybackRegistry},
    session::{InboundMessage, SessionHandler},
    sources::Sample,
    transport::{self, SessionSlots, VoiceGateway, VoiceSession},
    voice_queue::{samples_to_f32_bytes_into, VoiceQueue},
};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use itertools::Itertools;
use poise::serenity_prelude::{self as serenity, Cache, ChannelId, GuildId, Http, UserId};
use songbird::{
    input::{Input, RawAdapter},
    tracks::Track,
    Call, SerenityInit, Songbird,
};
use std::{
    io::{Read, Seek, SeekFrom},
    sync::{Arc, Mutex as StdMutex, MutexGuard, OnceLock},
};
use symphonia::core::{
    audio::{Channels, SampleBuffer},
    codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_OPUS},
    formats::Packet,
    io::MediaSource,
};
use tokio::sync::Mutex;

type Context<'a> = poise::Context<'a, SessionHandler, anyhow::Error>;

fn plock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(l) => l,
        Err(e) => e.into_inner(),
    }
}

// ============================================================================
// Voice Audio Source
// ============================================================================

/// Pull-based audio source that reads from a [`VoiceQueue`] on demand.
/// Songbird's audio thread calls Read::read() at playback pace.
struct QueueAudioSource {
    guild_id: u64,
    queue: Arc<StdMutex<VoiceQueue>>,
}

impl Read for QueueAudioSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        // f32 stereo = 8 bytes per sample
        let samples_needed = buf.len() / 8;

        let (samples, passed_markers) = plock(&self.queue).pull_samples(samples_needed);

        for tag in passed_markers {
            debug!("Guild {} finished playing {tag}", self.guild_id);
        }

        let bytes_written = samples_to_f32_bytes_into(&samples, buf);

        // Pad with silence if needed
        if bytes_written < buf.len() {
            buf[bytes_written..].fill(0);
        }

        Ok(buf.len())
    }
}

impl Seek for QueueAudioSource {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        // Live audio source doesn't support seeking
        Ok(0)
    }
}

impl MediaSource for QueueAudioSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn create_voice_input(guild_id: u64, queue: Arc<StdMutex<VoiceQueue>>) -> Input {
    let source = QueueAudioSource { guild_id, queue };
    let adapter = RawAdapter::new(source, SAMPLE_RATE, CHANNELS as u32);

    adapter.into()
}

// ============================================================================
// Voice Session
// ============================================================================

fn make_opus_decoder() -> Result<Box<dyn Decoder>> {
    let mut params = CodecParameters::new();
    params
        .for_codec(CODEC_TYPE_OPUS)
        .with_sample_rate(SAMPLE_RATE)
        .with_channels(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);

    let decoder = songbird::input::codecs::CODEC_REGISTRY
        .make(&params, &DecoderOptions::default())
        .map_err(|e| anyhow!("Failed to create Opus decoder: {e}"))?;

    Ok(decoder)
}

/// A songbird call plus the queue its track plays from.
///
/// Songbird mixes every track and encodes the result itself, so Opus packets
/// are not passed through to the call: `send_opus_packet` decodes them to PCM
/// and songbird encodes that again on its way out.
struct SongbirdSession {
    call: Arc<Mutex<Call>>,
    queue: Arc<StdMutex<VoiceQueue>>,
    /// Created on the first Opus packet
    opus: StdMutex<Option<Box<dyn Decoder>>>,
}

impl SongbirdSession {
    fn new(call: Arc<Mutex<Call>>) -> Self {
        Self {
            call,
            queue: Arc::new(StdMutex::new(VoiceQueue::new())),
            opus: StdMutex::new(None),
        }
    }

    /// Replaces whatever the call plays with a live track over the queue.
    async fn start_track(&self, guild_id: u64) {
        let track = Track::new(create_voice_input(guild_id, self.queue.clone()));
        self.call.lock().await.play_only(track);
    }

    fn decode_opus(&self, packet: &[u8]) -> Result<Vec<Sample>> {
        let mut decoder = plock(&self.opus);

        if decoder.is_none() {
            *decoder = Some(make_opus_decoder()?);
        }

        let decoder = decoder
            .as_mut()
            .context("Opus decoder missing after initialisation")?;

        let packet = Packet::new_from_slice(0, 0, 0, packet);
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| anyhow!("Failed to decode Opus packet: {e}"))?;

        let channels = decoded.spec().channels.count();
        let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);

        let samples = match channels {
            1 => buf.samples().iter().map(|s| (*s, *s)).collect(),
            2 => buf.samples().iter().copied().tuples::<Sample>().collect(),
            n => buf
                .samples()
                .chunks_exact(n)
                .map(|frame| (frame[0], frame[1]))
                .collect(),
        };

        Ok(samples)
    }
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    async fn is_ready(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn send_raw_pcm(&self, pcm: &[u8]) -> Result<()> {
        plock(&self.queue).push_pcm(pcm);
        Ok(())
    }

    async fn send_opus_packet(&self, packet: &[u8]) -> Result<()> {
        let samples = self.decode_opus(packet)?;
        plock(&self.queue).push_samples(samples);
        Ok(())
    }

    async fn insert_marker(&self, tag: &str) {
        plock(&self.queue).push_marker(tag);
    }

    async fn skip_to_next_marker(&self) -> bool {
        plock(&self.queue).skip_to_next_marker().is_some()
    }

    async fn tracks_remaining(&self) -> usize {
        plock(&self.queue).tracks_remaining()
    }
}

// ============================================================================
// Voice Gateway
// ============================================================================

pub struct DiscordVoice {
    manager: Arc<Songbird>,
    http: Arc<Http>,
    cache: Arc<Cache>,
    sessions: SessionSlots<SongbirdSession>,
}

impl DiscordVoice {
    pub fn new(manager: Arc<Songbird>, http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self {
            manager,
            http,
            cache,
            sessions: SessionSlots::new(),
        }
    }

    fn member_voice_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.cache.guild(guild_id).and_then(|guild| {
            guild
                .voice_states
                .get(&user_id)
                .and_then(|state| state.channel_id)
        })
    }
}

#[async_trait]
impl VoiceGateway for DiscordVoice {
    async fn connect_member(
        &self,
        guild_id: transport::GuildId,
        user_id: transport::UserId,
    ) -> bool {
        let guild = GuildId::new(guild_id);

        let Some(channel) = self.member_voice_channel(guild, UserId::new(user_id)) else {
            return false;
        };

        match self.manager.join(guild, channel).await {
            Ok(call) => {
                // Rejoining moves the existing call, its track and queue stay
                let (session, created) = self
                    .sessions
                    .get_or_insert_with(guild_id, || SongbirdSession::new(call));

                if created {
                    session.start_track(guild_id).await;
                }

                info!("Joined voice channel {channel} in guild {guild_id}");
                true
            }
            Err(e) => {
                error!("Failed to join voice channel {channel}: {e:?}");
                false
            }
        }
    }

    async fn session(&self, guild_id: transport::GuildId) -> Option<Arc<dyn VoiceSession>> {
        self.sessions
            .get(guild_id)
            .map(|session| session as Arc<dyn VoiceSession>)
    }

    async fn disconnect(&self, guild_id: transport::GuildId) -> bool {
        let session = self.sessions.remove(guild_id);

        if let Some(session) = &session {
            plock(&session.queue).clear();
        }

        match self.manager.remove(GuildId::new(guild_id)).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Failed to leave voice channel in guild {guild_id}: {e:?}");
                session.is_some()
            }
        }
    }

    async fn notify(&self, channel_id: transport::ChannelId, text: &str) {
        if let Err(e) = ChannelId::new(channel_id).say(&*self.http, text).await {
            error!("Error while sending Discord message: {e:?}");
        }
    }
}

// ============================================================================
// Bot
// ============================================================================

/// Handle to the running bot, used for shutdown.
pub struct DiscordBot {
    shard_manager: Arc<serenity::ShardManager>,
    playback: Arc<OnceLock<Arc<PlaybackRegistry>>>,
}

impl DiscordBot {
    pub async fn shutdown(&self) {
        if let Some(playback) = self.playback.get() {
            playback.shutdown().await;
        }
        self.shard_manager.shutdown_all().await;
    }
}

/// Initialize the Discord bot
pub async fn init(
    bus: &EventBus,
    config: &Config,
    discord_config: &DiscordConfig,
) -> Result<DiscordBot> {
    let token = discord_config.discord_token.clone();
    let guild_id = discord_config.discord_guild_id.map(GuildId::new);

    let fetcher = Arc::new(YtDlpFetcher::new(&config.fetcher));
    let pipeline = Arc::new(Pipeline::from_config(config, fetcher));
    let playback = Arc::new(OnceLock::new());

    let bus_for_setup = bus.clone();
    let playback_for_setup = playback.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ping()],
            event_handler: |ctx, event, _framework, data| Box::pin(event_handler(ctx, event, data)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                // Guild commands update instantly, global ones can take an hour
                match guild_id {
                    Some(guild_id) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            guild_id,
                        )
                        .await?
                    }
                    None => {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?
                    }
                }

                let manager = songbird::get(ctx)
                    .await
                    .context("Songbird Voice client placed in at initialisation.")?;

                let gateway: Arc<dyn VoiceGateway> = Arc::new(DiscordVoice::new(
                    manager,
                    ctx.http.clone(),
                    ctx.cache.clone(),
                ));

                let registry = Arc::new(PlaybackRegistry::new(
                    pipeline,
                    gateway.clone(),
                    bus_for_setup.clone(),
                ));

                if playback_for_setup.set(registry.clone()).is_err() {
                    warn!("Discord setup ran twice, keeping the first playback registry");
                }

                info!("Discord bot ready and commands registered!");
                Ok(SessionHandler::new(gateway, registry, bus_for_setup))
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .register_songbird()
        .await?;

    let shard_manager = client.shard_manager.clone();

    // Spawn the Discord client in a separate task
    tokio::spawn(async move {
        let mut client = client;
        if let Err(e) = client.start().await {
            error!("Discord client error: {:?}", e);
        }
    });

    Ok(DiscordBot {
        shard_manager,
        playback,
    })
}

/// Handle Discord events (messages)
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &SessionHandler,
) -> Result<(), anyhow::Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // Ignore bot messages
        if new_message.author.bot {
            return Ok(());
        }

        // Voice commands only make sense in a guild
        let Some(guild_id) = new_message.guild_id else {
            return Ok(());
        };

        let message = InboundMessage {
            guild_id: guild_id.get(),
            channel_id: new_message.channel_id.get(),
            author_id: new_message.author.id.get(),
            content: new_message.content.clone(),
        };

        // Handle off the gateway task so a slow command doesn't stall others
        let handler = data.clone();
        tokio::spawn(async move {
            handler.handle(&message).await;
        });
    }

    Ok(())
}

/// Ping pong!
#[poise::command(slash_command)]
async fn ping(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    ctx.say("Pong!").await?;
    Ok(())
}
