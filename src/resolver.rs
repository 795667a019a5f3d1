//! Maps remote media URLs to deterministic local cache paths.
//!
//! A URL is matched against an ordered table of host patterns. The first
//! pattern covering the *whole* URL yields a platform tag and the content id,
//! which together with the requested format name the cached file:
//! `<cache_dir>/<platform>.<content_id>.<ext>`.

use crate::error::PipelineError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Mp3,
    Opus,
    /// No format given by the user, resolves to [`Format::DEFAULT`]
    #[default]
    Unspecified,
}

impl Format {
    pub const DEFAULT: Format = Format::Opus;

    /// Parses the optional format argument of `.play`.
    pub fn parse(token: Option<&str>) -> Result<Format, PipelineError> {
        match token.map(|t| t.to_ascii_lowercase()) {
            None => Ok(Format::Unspecified),
            Some(t) if t == "mp3" => Ok(Format::Mp3),
            Some(t) if t == "opus" => Ok(Format::Opus),
            Some(t) => Err(PipelineError::UnsupportedFormat { format: t }),
        }
    }

    pub fn resolved(self) -> Format {
        match self {
            Format::Unspecified => Format::DEFAULT,
            format => format,
        }
    }

    /// File extension, also passed to the fetcher as the target audio format.
    pub fn extension(self) -> &'static str {
        match self.resolved() {
            Format::Mp3 => "mp3",
            _ => "opus",
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// One `.play` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRequest {
    pub url: String,
    pub format: Format,
}

impl MediaRequest {
    pub fn new(url: impl Into<String>, format: Format) -> Self {
        Self {
            url: url.into(),
            format: format.resolved(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub platform: String,
    pub content_id: String,
}

impl CacheKey {
    pub fn file_name(&self, format: Format) -> String {
        format!(
            "{}.{}.{}",
            self.platform,
            self.content_id,
            format.extension()
        )
    }

    pub fn cache_path(&self, cache_dir: impl AsRef<Path>, format: Format) -> PathBuf {
        cache_dir.as_ref().join(self.file_name(format))
    }
}

/// A known host URL shape. The content id is taken from the `id` capture
/// group, or the first group if the pattern has no named group.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UrlPattern {
    pub tag: String,

    #[serde(with = "serde_regex")]
    pub regex: Regex,
}

impl UrlPattern {
    /// Returns the content id if the pattern covers the entire URL.
    fn match_whole(&self, url: &str) -> Option<String> {
        let caps = self.regex.captures(url)?;
        let whole = caps.get(0)?;

        if whole.start() != 0 || whole.end() != url.len() {
            return None;
        }

        caps.name("id")
            .or_else(|| caps.get(1))
            .map(|id| id.as_str().to_string())
            .filter(|id| !id.is_empty())
    }
}

lazy_static! {
    static ref BUILTIN_PATTERNS: Vec<UrlPattern> = vec![
        UrlPattern {
            tag: "yt_full".to_string(),
            regex: Regex::new(
                r"^https?://(?:www\.|m\.)?youtube\.com/watch\?v=(?P<id>[A-Za-z0-9_-]+)$"
            )
            .unwrap(),
        },
        UrlPattern {
            tag: "yt_mangled".to_string(),
            regex: Regex::new(r"^https?://youtu\.be/(?P<id>[A-Za-z0-9_-]+)$").unwrap(),
        },
    ];
}

#[derive(Clone, Debug)]
pub struct UrlResolver {
    patterns: Vec<UrlPattern>,
}

impl Default for UrlResolver {
    fn default() -> Self {
        Self {
            patterns: BUILTIN_PATTERNS.clone(),
        }
    }
}

impl UrlResolver {
    /// Built-in host patterns followed by `extra`.
    pub fn with_patterns(extra: impl IntoIterator<Item = UrlPattern>) -> Self {
        let mut resolver = Self::default();
        resolver.patterns.extend(extra);
        resolver
    }

    pub fn resolve(&self, url: &str) -> Result<CacheKey, PipelineError> {
        self.patterns
            .iter()
            .find_map(|pattern| {
                pattern.match_whole(url).map(|content_id| CacheKey {
                    platform: pattern.tag.clone(),
                    content_id,
                })
            })
            .ok_or_else(|| PipelineError::UnsupportedPlatform {
                url: url.to_string(),
            })
    }

    /// Resolves `request` straight to its cache file under `cache_dir`.
    pub fn cache_path(
        &self,
        request: &MediaRequest,
        cache_dir: impl AsRef<Path>,
    ) -> Result<PathBuf, PipelineError> {
        let key = self.resolve(&request.url)?;
        Ok(key.cache_path(cache_dir, request.format))
    }
}
