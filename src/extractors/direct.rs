use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

use super::{discard_partial, download_to_file, Asset, FetchRequest, SourceStrategy, StrategyFailure};
use crate::config::Config;
use crate::utils::{placeholder_title, sanitize_filename};
use crate::Result;

/// Direct URL strategy for audio and video files
pub struct DirectStrategy {
    client: Client,
}

impl DirectStrategy {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.transcription.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client })
    }

    /// Check if URL points to an audio or video file
    fn is_media_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let path = parsed.path().to_lowercase();

        // Check for common audio/video extensions
        let media_extensions = [
            ".mp3", ".m4a", ".wav", ".flac", ".ogg", ".aac",
            ".mp4", ".avi", ".mov", ".mkv", ".webm", ".m4v"
        ];

        media_extensions.iter().any(|ext| path.ends_with(ext))
    }
}

/// Title derived from the last path segment, without extension
fn title_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let filename = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|filename| !filename.is_empty())?;

    // Remove extension and decode URL encoding
    let name = match filename.rfind('.') {
        Some(dot_pos) => &filename[..dot_pos],
        None => filename,
    };
    let decoded = urlencoding::decode(name)
        .unwrap_or_else(|_| name.into())
        .replace(['_', '-'], " ");

    Some(sanitize_filename(&decoded)).filter(|t| !t.is_empty())
}

#[async_trait]
impl SourceStrategy for DirectStrategy {
    async fn try_fetch(&self, request: &FetchRequest) -> std::result::Result<Asset, StrategyFailure> {
        let title = request
            .initial_title()
            .or_else(|| title_from_url(&request.locator))
            .unwrap_or_else(|| placeholder_title(&request.locator));
        let target = request.target_path(&title);

        let result: Result<Asset> = async {
            download_to_file(&self.client, &request.locator, &target).await?;
            Asset::from_download(target.clone(), title.clone())
        }
        .await;

        result.map_err(|err| {
            discard_partial(&target);
            StrategyFailure::with_title(err, Some(title))
        })
    }

    fn supports_url(&self, url: &str) -> bool {
        self.is_media_url(url)
    }

    fn name(&self) -> &'static str {
        "Direct URL"
    }
}
