use anyhow::Result;
use sha2::{Digest, Sha256};
use url::Url;

use crate::PipelineError;

/// Characters that are not allowed in file names on common filesystems
const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest title (in characters) used as a file stem
pub const MAX_TITLE_CHARS: usize = 100;

/// Prefix of titles derived from a hash of the locator
pub const PLACEHOLDER_PREFIX: &str = "video_";

/// Validate a URL and return normalized version
pub fn validate_and_normalize_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim())
        .map_err(|_| PipelineError::UnsupportedUrl(url.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::UnsupportedUrl(format!(
            "{} (URL must use HTTP or HTTPS protocol)",
            url
        ))
        .into());
    }

    Ok(parsed)
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Turn a video title into a safe file stem.
///
/// Illegal characters are dropped (not replaced), surrounding dots and spaces
/// are trimmed and the result is cut to [`MAX_TITLE_CHARS`] characters.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect();

    let truncated: String = cleaned
        .trim_matches(|c| c == '.' || c == ' ')
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();

    truncated.trim_end_matches(|c| c == '.' || c == ' ').to_string()
}

/// Stable stand-in title for a locator when no name is known
pub fn placeholder_title(locator: &str) -> String {
    let digest = Sha256::digest(locator.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", PLACEHOLDER_PREFIX, hex)
}

/// Placeholder titles may always be replaced by a better-resolved one
pub fn is_placeholder_title(title: &str) -> bool {
    title.starts_with(PLACEHOLDER_PREFIX)
}

/// Extract the host from a URL (used for DNS probing)
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(|host| host.to_string())
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("yt-dlp").await {
        missing.push("yt-dlp - required for the fallback download strategy".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
