use crate::{
    config::{FetchPolicy, FetcherConfig, PipelineConfig},
    error::PipelineError,
    resolver::{Format, MediaRequest, UrlResolver},
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use youtube_dl::download_yt_dlp;

/// Downloads `url` as `format` audio to `path`.
///
/// Implementations report only whether the download could be started. A
/// failed download shows up as a missing file afterwards.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, format: Format, path: &Path) -> Result<(), PipelineError>;
}

/// Downloads the yt-dlp binary next to the configured path if it is missing.
pub async fn init(config: &FetcherConfig) -> anyhow::Result<()> {
    let yt_dlp_path = config.yt_dlp_path.clone();
    let yt_dlp_binary_exists = tokio::task::spawn_blocking(move || yt_dlp_path.exists()).await?;

    if !yt_dlp_binary_exists {
        let dir = config
            .yt_dlp_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        info!("Downloading yt-dlp binary to {}", dir.display());
        let downloaded = download_yt_dlp(dir).await?;

        if downloaded != config.yt_dlp_path {
            tokio::fs::rename(&downloaded, &config.yt_dlp_path).await?;
        }
    }

    Ok(())
}

/// Resolves the request's cache path and makes sure the file is there,
/// running `fetcher` unless a cached copy may be reused.
pub async fn fetch_to_cache(
    fetcher: &dyn MediaFetcher,
    resolver: &UrlResolver,
    request: &MediaRequest,
    config: &PipelineConfig,
) -> Result<PathBuf, PipelineError> {
    let path = resolver.cache_path(request, &config.cache_dir)?;

    let cached = tokio::fs::try_exists(&path).await.unwrap_or(false);

    if cached && config.fetch_policy == FetchPolicy::ReuseCached {
        debug!("Reusing cached {}", path.display());
    } else {
        if cached {
            // A leftover file would otherwise pass the artifact check below
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Could not remove stale {}: {e}", path.display());
            }
        }

        if let Err(e) = tokio::fs::create_dir_all(&config.cache_dir).await {
            warn!(
                "Could not create cache directory {}: {e}",
                config.cache_dir.display()
            );
        }

        info!("Fetching {} to {}", request.url, path.display());
        fetcher.fetch(&request.url, request.format, &path).await?;
    }

    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => Ok(path),
        _ => Err(PipelineError::FetchArtifactMissing { path }),
    }
}

/// Runs yt-dlp as a subprocess to download and transcode audio.
#[derive(Clone, Debug)]
pub struct YtDlpFetcher {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl YtDlpFetcher {
    pub fn new(config: &FetcherConfig) -> Self {
        Self {
            program: config.yt_dlp_path.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    pub fn command(&self, url: &str, format: Format, path: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);

        cmd.arg("--extract-audio")
            .arg("--audio-format")
            .arg(format.extension())
            // 0 is the best quality for --audio-quality
            .arg("--audio-quality")
            .arg("0")
            .arg("--no-playlist")
            .arg("--no-progress")
            // Only invoked when the cached copy must be replaced
            .arg("--force-overwrites")
            .arg("-o")
            .arg(path)
            .args(&self.extra_args)
            .arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, format: Format, path: &Path) -> Result<(), PipelineError> {
        let output = self
            .command(url, format, path)
            .output()
            .await
            .map_err(|source| PipelineError::FetchProcess {
                program: self.program.display().to_string(),
                source,
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("yt-dlp stdout: {}", line);
        }

        // Success is judged by the resulting file, not the exit code
        if !output.status.success() {
            warn!(
                "yt-dlp exited with code {code} for {url}: {stderr}",
                code = output.status.code().unwrap_or_default(),
                stderr = String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}
