use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod direct;
pub mod youtube;
pub mod ytdlp;

use crate::config::Config;
use crate::utils::{is_placeholder_title, sanitize_filename, validate_and_normalize_url};
use crate::{PipelineError, Result};

/// Downloaded audio awaiting transcription.
///
/// The asset owns its file: dropping it removes the file (best effort) unless
/// [`Asset::keep`] was called.
#[derive(Debug)]
pub struct Asset {
    path: PathBuf,
    size_bytes: u64,
    title: String,
    keep: bool,
}

impl Asset {
    /// Wrap a file a strategy just downloaded; a missing file is a failure
    pub fn from_download(path: PathBuf, title: impl Into<String>) -> Result<Self> {
        let metadata = fs_err::metadata(&path).map_err(|_| {
            PipelineError::AudioExtractionFailed(format!(
                "Audio file not created: {}",
                path.display()
            ))
        })?;

        if !metadata.is_file() {
            return Err(PipelineError::AudioExtractionFailed(format!(
                "Audio path is not a file: {}",
                path.display()
            ))
            .into());
        }

        Ok(Self {
            path,
            size_bytes: metadata.len(),
            title: title.into(),
            keep: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Resolved title, used as the file stem of the transcript
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Keep the file on disk and return its path
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for Asset {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(err) = fs_err::remove_file(&self.path) {
            tracing::debug!("Could not remove temporary audio: {}", err);
        }
    }
}

/// Everything a strategy needs to fetch one locator
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub locator: String,
    pub destination_dir: PathBuf,
    pub suggested_name: Option<String>,

    /// Title resolved by an earlier strategy, if any
    pub known_title: Option<String>,
}

impl FetchRequest {
    pub fn new(locator: &str, destination_dir: &Path, suggested_name: Option<&str>) -> Self {
        Self {
            locator: locator.to_string(),
            destination_dir: destination_dir.to_path_buf(),
            suggested_name: suggested_name.map(str::to_string),
            known_title: None,
        }
    }

    /// Title known before contacting the remote: an earlier resolution, else
    /// the sanitized suggested name
    pub fn initial_title(&self) -> Option<String> {
        self.known_title
            .clone()
            .or_else(|| self.suggested_name.as_deref().map(sanitize_filename))
            .filter(|title| !title.is_empty())
    }

    /// Where the audio for `title` is written
    pub fn target_path(&self, title: &str) -> PathBuf {
        self.destination_dir.join(format!("{}.mp4", title))
    }
}

/// Failure of one strategy, with any title it managed to resolve
#[derive(Debug)]
pub struct StrategyFailure {
    pub error: anyhow::Error,
    pub resolved_title: Option<String>,
}

impl StrategyFailure {
    pub fn with_title(error: anyhow::Error, title: Option<String>) -> Self {
        Self {
            error,
            resolved_title: title,
        }
    }
}

impl From<anyhow::Error> for StrategyFailure {
    fn from(error: anyhow::Error) -> Self {
        Self {
            error,
            resolved_title: None,
        }
    }
}

/// One way of turning a locator into a local audio file
#[async_trait]
pub trait SourceStrategy: Send + Sync {
    /// Download audio for the request into its destination directory
    async fn try_fetch(&self, request: &FetchRequest) -> std::result::Result<Asset, StrategyFailure>;

    /// Check if this strategy can handle the given URL
    fn supports_url(&self, url: &str) -> bool;

    /// Get the name of this strategy
    fn name(&self) -> &'static str;
}

/// Anything that can produce an [`Asset`] for a locator
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(
        &self,
        locator: &str,
        destination_dir: &Path,
        suggested_name: Option<&str>,
    ) -> Result<Asset>;
}

/// Ordered list of source strategies tried one after another
pub struct MediaFetcher {
    strategies: Vec<Box<dyn SourceStrategy>>,
}

impl MediaFetcher {
    /// Create a fetcher with the default strategies: YouTube player client,
    /// direct media URLs, then yt-dlp
    pub fn new(config: &Config) -> Result<Self> {
        let mut fetcher = Self::with_strategies(Vec::new());

        fetcher.register(Box::new(youtube::YoutubePlayerStrategy::new(config)?));
        fetcher.register(Box::new(direct::DirectStrategy::new(config)?));
        fetcher.register(Box::new(ytdlp::YtDlpStrategy::new(config.retry.policy())));

        Ok(fetcher)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn SourceStrategy>>) -> Self {
        Self { strategies }
    }

    /// Register a new strategy at the end of the list
    pub fn register(&mut self, strategy: Box<dyn SourceStrategy>) {
        self.strategies.push(strategy);
    }

    /// List all strategies in the order they are tried
    pub fn list_strategies(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl MediaSource for MediaFetcher {
    async fn fetch(
        &self,
        locator: &str,
        destination_dir: &Path,
        suggested_name: Option<&str>,
    ) -> Result<Asset> {
        validate_and_normalize_url(locator)?;

        let mut request = FetchRequest::new(locator, destination_dir, suggested_name);
        let mut last_error = None;

        for strategy in self.strategies.iter().filter(|s| s.supports_url(locator)) {
            tracing::debug!(strategy = strategy.name(), url = locator, "Trying source strategy");

            match strategy.try_fetch(&request).await {
                Ok(asset) => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        path = %asset.path().display(),
                        "Audio downloaded"
                    );
                    return Ok(asset);
                }
                Err(failure) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %format!("{:#}", failure.error),
                        "Source strategy failed"
                    );

                    if let Some(title) = failure.resolved_title.filter(|t| !t.is_empty()) {
                        let replaceable = request
                            .known_title
                            .as_deref()
                            .map_or(true, is_placeholder_title);
                        if replaceable {
                            request.known_title = Some(title);
                        }
                    }

                    last_error = Some(
                        failure
                            .error
                            .context(format!("{} download failed", strategy.name())),
                    );
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PipelineError::UnsupportedUrl(locator.to_string()).into()))
    }
}

/// Remove a partially written download, ignoring errors
pub(crate) fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(err) = fs_err::remove_file(path) {
            tracing::debug!("Could not remove partial download: {}", err);
        }
    }
}

/// Stream `url` into `output_path`
pub(crate) async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    output_path: &Path,
) -> Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to request audio stream")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download audio: HTTP {}", response.status());
    }

    let mut file = fs_err::File::create(output_path)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    let written: Result<()> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
        }
        file.flush()?;
        Ok(())
    }
    .await;

    if let Err(err) = written {
        drop(file);
        discard_partial(output_path);
        return Err(err);
    }

    tracing::debug!(bytes = downloaded, path = %output_path.display(), "Download complete");
    Ok(downloaded)
}
