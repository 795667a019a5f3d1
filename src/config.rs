use crate::{
    constants::{
        DEFAULT_BUFFER_RESERVE, DEFAULT_CACHE_DIR, DEFAULT_YT_DLP_PATH, IDEAL_CHUNK_SIZE,
        READINESS_POLL_INTERVAL, READINESS_TIMEOUT,
    },
    resolver::{UrlPattern, UrlResolver},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use tokio::fs::read_to_string;

pub const CONFIG_FILE: &str = "Config.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Only run the fetcher when the cache file does not exist yet
    #[default]
    ReuseCached,
    /// Run the fetcher on every request, overwriting the cache file
    Always,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory downloaded media is cached in
    pub cache_dir: PathBuf,

    /// Capacity hint for each playback's audio buffer
    pub buffer_reserve_bytes: usize,

    /// Raw PCM bytes per transport send
    pub chunk_size: usize,

    pub readiness_timeout_ms: u64,
    pub readiness_poll_interval_ms: u64,

    pub fetch_policy: FetchPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            buffer_reserve_bytes: DEFAULT_BUFFER_RESERVE,
            chunk_size: IDEAL_CHUNK_SIZE,
            readiness_timeout_ms: READINESS_TIMEOUT.as_millis() as u64,
            readiness_poll_interval_ms: READINESS_POLL_INTERVAL.as_millis() as u64,
            fetch_policy: FetchPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Path to the yt-dlp binary, downloaded on startup if missing
    pub yt_dlp_path: PathBuf,

    /// Extra arguments appended before the source URL
    pub extra_args: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: PathBuf::from(DEFAULT_YT_DLP_PATH),
            extra_args: vec![],
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Host patterns tried after the built-in ones
    pub patterns: Vec<UrlPattern>,
}

impl ResolverConfig {
    pub fn build(&self) -> UrlResolver {
        UrlResolver::with_patterns(self.patterns.iter().cloned())
    }
}

#[cfg(feature = "discord")]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DiscordConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Guild (server) ID for registering slash commands
    pub discord_guild_id: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[cfg(feature = "discord")]
    pub discord: Option<DiscordConfig>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub fetcher: FetcherConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

pub fn parse(config: &str) -> Result<Config> {
    let config: Config = toml::from_str(config)?;
    Ok(config)
}

pub async fn load() -> Result<Config> {
    let config = read_to_string(CONFIG_FILE)
        .await
        .with_context(|| format!("Failed to read {CONFIG_FILE}"))?;

    parse(&config).with_context(|| format!("Failed to parse {CONFIG_FILE}"))
}
