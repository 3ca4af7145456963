//! Tubescribe - resumable batch transcription of YouTube videos
//!
//! This library drives rows of a table file through download, transcription and
//! persistence, recording completion per row so interrupted runs can be resumed.

use std::path::PathBuf;

pub mod batch;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod output;
pub mod retry;
pub mod state;
pub mod transcribe;
pub mod utils;

pub use batch::{BatchOrchestrator, RunStatistics};
pub use cli::Cli;
pub use config::Config;
pub use extractors::{Asset, MediaFetcher, MediaSource, SourceStrategy};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use state::{RowState, RowStateStore, WorkItem};
pub use transcribe::{Transcriber, TranscriptionClient, TranscriptionResult};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported URL format: {0}")]
    UnsupportedUrl(String),

    #[error("No audio stream available for {0}")]
    NoAudioStream(String),

    #[error("Audio extraction failed: {0}")]
    AudioExtractionFailed(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Table file not found: {}", .0.display())]
    TableNotFound(PathBuf),

    #[error("No table file (*.{0}) found in the current directory")]
    NoTableFound(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
}

impl PipelineError {
    /// Errors that retrying cannot fix.
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::UnsupportedUrl(_)
            | PipelineError::NoAudioStream(_)
            | PipelineError::MissingDependency(_) => true,
            PipelineError::Api { status, .. } => !is_transient_status(*status),
            _ => false,
        }
    }

    /// True when this error marks an exhausted retry budget.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, PipelineError::RetriesExhausted { .. })
    }
}

/// Timeouts, rate limits and server-side failures are worth another attempt.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}
