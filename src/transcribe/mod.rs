use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::TranscriptionConfig;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::utils::extract_host;
use crate::PipelineError;

/// Transcription result returned by the service.
///
/// Only `text` is interpreted; every other field is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// The transcribed text
    pub text: String,

    /// Remaining response fields (language, duration, segments, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TranscriptionResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Speech-to-text backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio_path`
    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionResult>;
}

/// Client for an OpenAI-style `/v1/audio/transcriptions` endpoint
pub struct TranscriptionClient {
    client: Client,
    endpoint: String,
    api_key: String,
    language: String,
    response_format: String,
    dns_probe: bool,
    retry: RetryPolicy,
}

impl TranscriptionClient {
    /// Create a new transcription client
    pub fn new(config: &TranscriptionConfig, retry: RetryPolicy) -> Result<Self> {
        // Long audio takes minutes to transcribe; connecting should not.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build transcription HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            response_format: config.response_format.clone(),
            dns_probe: config.dns_probe,
            retry,
        })
    }

    /// Resolve the service host; failure only produces a warning
    pub async fn probe_dns(&self) -> bool {
        let Some(host) = extract_host(&self.endpoint) else {
            return false;
        };

        let resolved = match tokio::net::lookup_host((host.as_str(), 443)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(err) => {
                tracing::warn!(
                    host = %host,
                    error = %err,
                    "DNS resolution failed - will retry automatically"
                );
                false
            }
        };
        resolved
    }

    /// Send one transcription request
    async fn submit(&self, file_name: &str, content: &[u8]) -> Result<TranscriptionResult> {
        tracing::debug!(
            endpoint = %self.endpoint,
            bytes = content.len(),
            "Submitting audio for transcription"
        );

        let part = Part::bytes(content.to_vec())
            .file_name(file_name.to_string())
            .mime_str("audio/mp4")?;
        let form = Form::new()
            .part("file", part)
            .text("language", self.language.clone())
            .text("response_format", self.response_format.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        response
            .json::<TranscriptionResult>()
            .await
            .context("Failed to parse transcription response")
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<TranscriptionResult> {
        if self.dns_probe {
            self.probe_dns().await;
        }

        // Read once up front; local IO errors are never retried.
        let content = fs_err::read(audio_path)?;
        let file_name = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp4".to_string());

        retry_with_backoff(&self.retry, "Audio Transcription", || {
            self.submit(&file_name, &content)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned responses, one per connection, recording each raw request
    async fn spawn_stub_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let raw = read_request(&mut socket).await;
                recorded.lock().unwrap().push(raw);

                let reply = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        (format!("http://{}/v1/audio/transcriptions", addr), requests)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];

        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let headers = text[..header_end].to_lowercase();
            let body_len = buf.len() - (header_end + 4);

            if let Some(length) = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
            {
                if body_len >= length {
                    break;
                }
            } else if headers.contains("transfer-encoding: chunked") {
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
            } else {
                break;
            }
        }

        String::from_utf8_lossy(&buf).to_string()
    }

    fn client_for(endpoint: String, retry: RetryPolicy) -> TranscriptionClient {
        let config = TranscriptionConfig {
            api_key: "secret-key".to_string(),
            endpoint,
            dns_probe: false,
            ..TranscriptionConfig::default()
        };
        TranscriptionClient::new(&config, retry).unwrap()
    }

    fn audio_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("clip.mp4");
        fs_err::write(&path, b"not really audio").unwrap();
        path
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_result_keeps_extra_fields() {
        let raw = r#"{"text": "hello world", "language": "english", "duration": 12.5}"#;
        let result: TranscriptionResult = serde_json::from_str(raw).unwrap();

        assert_eq!(result.text, "hello world");
        assert_eq!(result.extra["language"], "english");
        assert_eq!(result.extra["duration"], 12.5);

        let round = serde_json::to_value(&result).unwrap();
        assert_eq!(round["duration"], 12.5);
    }

    #[test]
    fn test_result_requires_text() {
        assert!(serde_json::from_str::<TranscriptionResult>(r#"{"language": "en"}"#).is_err());
    }

    #[tokio::test]
    async fn test_successful_transcription_sends_multipart_form() {
        let dir = TempDir::new().unwrap();
        let (endpoint, requests) = spawn_stub_server(vec![(200, r#"{"text":"hi there","task":"transcribe"}"#)]).await;
        let client = client_for(endpoint, quick_retry());

        let result = client.transcribe(&audio_file(&dir)).await.unwrap();
        assert_eq!(result.text, "hi there");
        assert_eq!(result.extra["task"], "transcribe");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let raw = &requests[0];
        assert!(raw.starts_with("POST /v1/audio/transcriptions"));
        assert!(raw.to_lowercase().contains("authorization: bearer secret-key"));
        assert!(raw.contains("name=\"file\"; filename=\"clip.mp4\""));
        assert!(raw.contains("name=\"language\"\r\n\r\nen"));
        assert!(raw.contains("name=\"response_format\"\r\n\r\njson"));
        assert!(raw.contains("not really audio"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let dir = TempDir::new().unwrap();
        let (endpoint, requests) = spawn_stub_server(vec![
            (503, r#"{"error":"busy"}"#),
            (200, r#"{"text":"second time lucky"}"#),
        ])
        .await;
        let client = client_for(endpoint, quick_retry());

        let result = client.transcribe(&audio_file(&dir)).await.unwrap();
        assert_eq!(result.text, "second time lucky");
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_carries_status_and_body() {
        let dir = TempDir::new().unwrap();
        let (endpoint, requests) = spawn_stub_server(vec![(401, r#"{"error":"invalid api key"}"#)]).await;
        let client = client_for(endpoint, quick_retry());

        let err = client.transcribe(&audio_file(&dir)).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Api { status, body }) => {
                assert_eq!(*status, 401);
                assert!(body.contains("invalid api key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_audio_file_fails_without_retrying() {
        let client = client_for(
            "http://127.0.0.1:9/v1/audio/transcriptions".to_string(),
            RetryPolicy::default(),
        );

        let started = tokio::time::Instant::now();
        let err = client
            .transcribe(Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(err.downcast_ref::<std::io::Error>().is_some());
        assert!(!format!("{:#}", err).contains("attempts"));
    }

    #[tokio::test]
    async fn test_dns_probe_failure_is_not_fatal() {
        let client = client_for(
            "https://unresolvable.invalid/v1/audio/transcriptions".to_string(),
            quick_retry(),
        );
        assert!(!client.probe_dns().await);
    }
}
