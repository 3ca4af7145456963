use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{discard_partial, Asset, FetchRequest, SourceStrategy, StrategyFailure};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::utils::{is_placeholder_title, placeholder_title, sanitize_filename};
use crate::{PipelineError, Result};

/// Fallback strategy using yt-dlp; handles anything yt-dlp can extract
pub struct YtDlpStrategy {
    yt_dlp_path: String,
    retry: RetryPolicy,
}

impl YtDlpStrategy {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            retry,
        }
    }

    /// Use a specific yt-dlp executable
    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.yt_dlp_path = path.into();
        self
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Get video information using yt-dlp
    async fn get_video_info(&self, url: &str) -> Result<Value> {
        tracing::debug!("Extracting video info for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args([
                "--dump-json",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", error.trim());
        }

        let json_str = String::from_utf8(output.stdout)?;
        let info: Value = serde_json::from_str(&json_str)?;

        Ok(info)
    }

    /// Download the best audio-only format to `output_path`
    async fn download_audio(&self, url: &str, output_path: &Path) -> Result<()> {
        tracing::debug!("Downloading audio with yt-dlp for: {}", url);

        let template = output_template(output_path);
        let output = Command::new(&self.yt_dlp_path)
            .args([
                "--format", "bestaudio[ext=m4a]/bestaudio/best",
                "--output", template.as_str(),
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to download audio: {}", error.trim());
        }

        Ok(())
    }

    /// One download attempt; retried as a whole
    async fn fetch_once(&self, request: &FetchRequest) -> Result<Asset> {
        if !self.check_availability().await {
            return Err(PipelineError::MissingDependency(
                "yt-dlp is not available. Please install it: https://github.com/yt-dlp/yt-dlp".to_string(),
            )
            .into());
        }

        let mut title = request
            .initial_title()
            .unwrap_or_else(|| placeholder_title(&request.locator));

        if is_placeholder_title(&title) {
            let info = self.get_video_info(&request.locator).await?;
            if let Some(remote) = info["title"].as_str().map(sanitize_filename).filter(|t| !t.is_empty()) {
                title = remote;
            }
        }

        let audio_path = request.target_path(&title);

        if let Err(err) = self.download_audio(&request.locator, &audio_path).await {
            discard_partial(&audio_path);
            return Err(err);
        }

        if !audio_path.exists() {
            return Err(PipelineError::AudioExtractionFailed(
                "Audio file was not created by yt-dlp".to_string(),
            )
            .into());
        }

        Asset::from_download(audio_path, title)
    }
}

/// yt-dlp expands `%(...)s` fields in the output path, so literal percent
/// signs must be doubled
fn output_template(path: &Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}

#[async_trait]
impl SourceStrategy for YtDlpStrategy {
    async fn try_fetch(&self, request: &FetchRequest) -> std::result::Result<Asset, StrategyFailure> {
        retry_with_backoff(&self.retry, "YouTube Download (yt-dlp)", || self.fetch_once(request))
            .await
            .map_err(StrategyFailure::from)
    }

    fn supports_url(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_output_template_escapes_percent() {
        let template = output_template(Path::new("temp_audio/100% real.mp4"));
        assert_eq!(template, "temp_audio/100%% real.mp4");
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let policy = RetryPolicy::new(3, Duration::from_secs(60), Duration::from_secs(60));
        let strategy = YtDlpStrategy::new(policy).with_binary("definitely-not-yt-dlp-binary");

        let request = FetchRequest::new("https://youtu.be/dQw4w9WgXcQ", dir.path(), Some("clip"));
        let started = std::time::Instant::now();
        let failure = strategy.try_fetch(&request).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(format!("{:#}", failure.error).contains("yt-dlp is not available"));
        assert!(!strategy.check_availability().await);
    }
}
