use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::transcribe::TranscriptionResult;

/// Path of the transcript for a resolved title
pub fn transcript_path(output_dir: &Path, title: &str) -> PathBuf {
    output_dir.join(format!("{}.txt", title))
}

/// Write the transcript text to `<output_dir>/<title>.txt`, replacing any
/// existing file, and sync it to disk
pub fn save_transcript(
    result: &TranscriptionResult,
    output_dir: &Path,
    title: &str,
) -> Result<PathBuf> {
    let path = transcript_path(output_dir, title);

    let mut file = fs_err::File::create(&path)?;
    file.write_all(result.text.as_bytes())?;
    file.sync_all()
        .with_context(|| format!("Failed to sync transcript {}", path.display()))?;

    Ok(path)
}
