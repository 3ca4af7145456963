use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{discard_partial, download_to_file, Asset, FetchRequest, SourceStrategy, StrategyFailure};
use crate::config::Config;
use crate::utils::{placeholder_title, sanitize_filename};
use crate::{PipelineError, Result};

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";
const CLIENT_NAME: &str = "ANDROID_VR";
const CLIENT_VERSION: &str = "1.60.19";
const CLIENT_USER_AGENT: &str = "com.google.android.apps.youtube.vr.oculus/1.60.19 (Linux; U; Android 12L; eureka-user Build/SQ3A.220605.009.A1) gzip";

/// Subset of the player response we rely on
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    video_details: Option<VideoDetails>,
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoDetails {
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    adaptive_formats: Vec<StreamFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamFormat {
    itag: u32,
    mime_type: String,
    url: Option<String>,
    bitrate: Option<u64>,
}

impl StreamFormat {
    fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

/// YouTube audio via the player API, without external tools
pub struct YoutubePlayerStrategy {
    client: Client,
}

impl YoutubePlayerStrategy {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(CLIENT_USER_AGENT)
            .connect_timeout(Duration::from_secs(config.transcription.connect_timeout_secs))
            .build()
            .context("Failed to build YouTube HTTP client")?;

        Ok(Self { client })
    }

    /// Ask the player endpoint about a video
    async fn get_player_response(&self, video_id: &str) -> Result<PlayerResponse> {
        tracing::debug!("Requesting player response for: {}", video_id);

        let body = json!({
            "videoId": video_id,
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION,
                    "androidSdkVersion": 32,
                    "hl": "en",
                    "gl": "US",
                }
            },
            "contentCheckOk": true,
            "racyCheckOk": true,
        });

        let response = self
            .client
            .post(PLAYER_ENDPOINT)
            .json(&body)
            .send()
            .await
            .context("Player request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Player request failed: HTTP {}", response.status());
        }

        let player: PlayerResponse = response
            .json()
            .await
            .context("Failed to parse player response")?;

        if let Some(status) = &player.playability_status {
            if status.status != "OK" {
                return Err(PipelineError::AudioExtractionFailed(format!(
                    "video {} is not playable: {} {}",
                    video_id,
                    status.status,
                    status.reason.as_deref().unwrap_or("")
                ))
                .into());
            }
        }

        Ok(player)
    }

    async fn download(&self, request: &FetchRequest, title: &str, stream: &StreamFormat) -> Result<Asset> {
        let target = request.target_path(title);
        let url = stream.url.as_deref().unwrap_or_default();

        tracing::debug!(itag = stream.itag, mime = %stream.mime_type, "Selected audio stream");

        if let Err(err) = download_to_file(&self.client, url, &target).await {
            discard_partial(&target);
            return Err(err);
        }

        Asset::from_download(target, title)
    }
}

#[async_trait]
impl SourceStrategy for YoutubePlayerStrategy {
    async fn try_fetch(&self, request: &FetchRequest) -> std::result::Result<Asset, StrategyFailure> {
        let video_id = extract_video_id(&request.locator)?;
        let mut title = request.initial_title();

        let result: Result<Asset> = async {
            let player = self.get_player_response(&video_id).await?;

            if title.is_none() {
                title = player
                    .video_details
                    .as_ref()
                    .and_then(|details| details.title.as_deref())
                    .map(sanitize_filename)
                    .filter(|t| !t.is_empty());
            }
            let resolved = title
                .clone()
                .unwrap_or_else(|| placeholder_title(&request.locator));

            let formats = player
                .streaming_data
                .map(|data| data.adaptive_formats)
                .unwrap_or_default();
            let stream = select_audio_stream(&formats, &video_id)?;

            self.download(request, &resolved, stream).await
        }
        .await;

        result.map_err(|err| StrategyFailure::with_title(err, title))
    }

    fn supports_url(&self, url: &str) -> bool {
        // Support various YouTube URL formats
        let url_lower = url.to_lowercase();
        url_lower.contains("youtube.com/watch") ||
        url_lower.contains("youtu.be/") ||
        url_lower.contains("youtube.com/embed/") ||
        url_lower.contains("youtube.com/v/") ||
        url_lower.contains("youtube.com/shorts/") ||
        url_lower.contains("youtube.com/live/") ||
        url_lower.contains("m.youtube.com/")
    }

    fn name(&self) -> &'static str {
        "YouTube player"
    }
}

/// Pick the first directly downloadable audio-only stream, preferring MP4 audio
fn select_audio_stream<'a>(formats: &'a [StreamFormat], video_id: &str) -> Result<&'a StreamFormat> {
    let audio: Vec<&StreamFormat> = formats.iter().filter(|f| f.is_audio()).collect();

    if audio.is_empty() {
        return Err(PipelineError::NoAudioStream(video_id.to_string()).into());
    }

    let downloadable = |f: &&&StreamFormat| f.url.as_deref().is_some_and(|u| !u.is_empty());

    audio
        .iter()
        .filter(downloadable)
        .find(|f| f.mime_type.starts_with("audio/mp4"))
        .or_else(|| {
            audio
                .iter()
                .filter(downloadable)
                .max_by_key(|f| f.bitrate.unwrap_or(0))
        })
        .copied()
        .ok_or_else(|| {
            PipelineError::AudioExtractionFailed(format!(
                "audio streams of {} require signature deciphering",
                video_id
            ))
            .into()
        })
}

/// Extract the 11-character video id from the common YouTube URL shapes
pub fn extract_video_id(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim())
        .map_err(|_| PipelineError::UnsupportedUrl(url.to_string()))?;
    let host = parsed.host_str().unwrap_or("").trim_start_matches("www.").trim_start_matches("m.");

    let candidate = match host {
        "youtu.be" => parsed.path_segments().and_then(|mut s| s.next()).map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let mut segments = parsed.path_segments().into_iter().flatten();
            match segments.next() {
                Some("watch") => parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("embed" | "v" | "shorts" | "live") => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    };

    candidate
        .filter(|id| is_valid_video_id(id))
        .ok_or_else(|| PipelineError::UnsupportedUrl(url.to_string()).into())
}

fn is_valid_video_id(id: &str) -> bool {
    id.len() == 11 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
