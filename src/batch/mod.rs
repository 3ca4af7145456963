//! Batch Orchestrator: drives every pending row of a table through download,
//! transcription and persistence, one row at a time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::extractors::{MediaFetcher, MediaSource};
use crate::output;
use crate::state::{line_number, RowStateStore, WorkItem};
use crate::transcribe::{Transcriber, TranscriptionClient};
use crate::utils::format_file_size;

/// Outcome counters of one run; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatistics {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            successful: 0,
            failed: 0,
            skipped: 0,
            started_at: Utc::now(),
        }
    }

    /// Rows looked at during the run
    pub fn total(&self) -> usize {
        self.successful + self.failed + self.skipped
    }

    /// Seconds since the run started
    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential row processor
pub struct BatchOrchestrator {
    fetcher: Box<dyn MediaSource>,
    transcriber: Box<dyn Transcriber>,
    temp_dir: PathBuf,
    output_dir: PathBuf,
    keep_audio: bool,
    show_progress: bool,
}

impl BatchOrchestrator {
    pub fn new(
        fetcher: Box<dyn MediaSource>,
        transcriber: Box<dyn Transcriber>,
        temp_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            transcriber,
            temp_dir: temp_dir.into(),
            output_dir: output_dir.into(),
            keep_audio: false,
            show_progress: false,
        }
    }

    /// Build the production pipeline: default fetch strategies and the
    /// configured transcription service
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = MediaFetcher::new(config)?;
        let transcriber = TranscriptionClient::new(&config.transcription, config.retry.policy())?;

        Ok(Self::new(
            Box::new(fetcher),
            Box::new(transcriber),
            config.app.temp_dir.clone(),
            config.app.output_dir.clone(),
        )
        .keep_audio(config.app.keep_audio))
    }

    pub fn keep_audio(mut self, keep: bool) -> Self {
        self.keep_audio = keep;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the temp and output directories
    pub fn prepare_directories(&self) -> Result<()> {
        fs_err::create_dir_all(&self.temp_dir)?;
        fs_err::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Process every row of `store` in order.
    ///
    /// Row failures are counted and logged; a failure to persist the table
    /// aborts the run.
    pub async fn run(&self, store: &mut RowStateStore) -> Result<RunStatistics> {
        let span = tracing::info_span!(
            "run",
            run_id = %Uuid::new_v4(),
            table = %store.path().display()
        );

        self.run_rows(store).instrument(span).await
    }

    async fn run_rows(&self, store: &mut RowStateStore) -> Result<RunStatistics> {
        let mut stats = RunStatistics::new();
        tracing::info!(rows = store.len(), "Starting batch");

        for index in 0..store.len() {
            let row = line_number(index);

            if store.is_processed(index) {
                tracing::info!(
                    row,
                    name = store.display_name(index).unwrap_or_default(),
                    "Skipping row (already processed)"
                );
                stats.skipped += 1;
                continue;
            }

            let Some(item) = store.work_item(index) else {
                tracing::info!(row, "Skipping row (missing name or URL)");
                stats.skipped += 1;
                continue;
            };

            tracing::info!(row, name = %item.name, url = %item.locator, "Processing row");

            match self.process_item(&item).await {
                Ok(transcript) => {
                    store.mark_done(index)?;
                    store
                        .persist()
                        .with_context(|| format!("Failed to record completion of row {}", row))?;

                    tracing::info!(row, path = %transcript.display(), "Transcript saved");
                    stats.successful += 1;
                }
                Err(err) => {
                    tracing::error!(
                        row,
                        name = %item.name,
                        url = %item.locator,
                        error = %format!("{err:#}"),
                        "Row failed"
                    );
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            successful = stats.successful,
            failed = stats.failed,
            skipped = stats.skipped,
            elapsed_secs = stats.elapsed_secs(),
            "Batch finished"
        );

        Ok(stats)
    }

    /// Fetch, transcribe and save one row; returns the transcript path
    async fn process_item(&self, item: &WorkItem) -> Result<PathBuf> {
        let progress = self.stage_spinner();
        let outcome = self.run_stages(item, &progress).await;
        progress.finish_and_clear();
        outcome
    }

    async fn run_stages(&self, item: &WorkItem, progress: &ProgressBar) -> Result<PathBuf> {
        progress.set_message(format!("[1/3] Downloading audio: {}", item.name));
        let asset = self
            .fetcher
            .fetch(&item.locator, &self.temp_dir, Some(&item.name))
            .await
            .context("Failed to download audio")?;

        tracing::info!(
            row = item.line_number(),
            title = asset.title(),
            size = %format_file_size(asset.size_bytes()),
            "Audio downloaded"
        );

        progress.set_message(format!("[2/3] Transcribing: {}", asset.title()));
        let result = self
            .transcriber
            .transcribe(asset.path())
            .await
            .context("Failed to transcribe audio")?;

        progress.set_message(format!("[3/3] Saving transcript: {}", asset.title()));
        let transcript = output::save_transcript(&result, &self.output_dir, asset.title())?;

        if self.keep_audio {
            let kept = asset.keep();
            tracing::debug!(path = %kept.display(), "Keeping audio");
        } else {
            drop(asset);
        }

        Ok(transcript)
    }

    fn stage_spinner(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        progress.enable_steady_tick(Duration::from_millis(120));
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::Asset;
    use crate::state::RowState;
    use crate::transcribe::{MockTranscriber, TranscriptionResult};
    use crate::utils::sanitize_filename;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Writes a small audio file named after the suggested name
    struct FakeSource {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn fetch(
            &self,
            _locator: &str,
            destination_dir: &Path,
            suggested_name: Option<&str>,
        ) -> Result<Asset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("network unreachable");
            }

            let title = sanitize_filename(suggested_name.unwrap_or("untitled"));
            let path = destination_dir.join(format!("{}.mp4", title));
            fs_err::write(&path, b"fake audio")?;
            Asset::from_download(path, title)
        }
    }

    struct Fixture {
        dir: TempDir,
        table: PathBuf,
        fetch_calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new(table: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("videos.csv");
            fs_err::write(&path, table).unwrap();
            fs_err::create_dir(dir.path().join("temp")).unwrap();
            fs_err::create_dir(dir.path().join("out")).unwrap();

            Self {
                dir,
                table: path,
                fetch_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn orchestrator(&self, transcriber: MockTranscriber, fail_fetch: bool) -> BatchOrchestrator {
            BatchOrchestrator::new(
                Box::new(FakeSource {
                    calls: self.fetch_calls.clone(),
                    fail: fail_fetch,
                }),
                Box::new(transcriber),
                self.dir.path().join("temp"),
                self.dir.path().join("out"),
            )
        }

        fn files(&self, sub: &str) -> BTreeSet<String> {
            fs_err::read_dir(self.dir.path().join(sub))
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        }
    }

    fn transcriber_returning(text: &'static str, times: usize) -> MockTranscriber {
        let mut mock = MockTranscriber::new();
        mock.expect_transcribe()
            .times(times)
            .returning(move |_| Ok(TranscriptionResult::new(text)));
        mock
    }

    #[tokio::test]
    async fn test_mixed_table_scenario() {
        let fixture = Fixture::new(
            "name,url,status\n\
             Done Talk,https://youtu.be/aaaaaaaaaaa,done\n\
             New Talk,https://youtu.be/bbbbbbbbbbb,\n\
             No Link,,\n",
        );
        let orchestrator = fixture.orchestrator(transcriber_returning("hello", 1), false);

        let mut store = RowStateStore::open(&fixture.table).unwrap();
        let stats = orchestrator.run(&mut store).await.unwrap();

        assert_eq!((stats.successful, stats.failed, stats.skipped), (1, 0, 2));
        assert_eq!(stats.total(), 3);
        assert_eq!(fixture.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.files("out"), BTreeSet::from(["New Talk.txt".to_string()]));
        assert!(fixture.files("temp").is_empty());
        assert_eq!(
            fs_err::read_to_string(fixture.dir.path().join("out/New Talk.txt")).unwrap(),
            "hello"
        );

        let reopened = RowStateStore::open(&fixture.table).unwrap();
        assert_eq!(reopened.state(0), Some(RowState::Done));
        assert_eq!(reopened.state(1), Some(RowState::Done));
        assert_eq!(reopened.state(2), Some(RowState::Pending));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let fixture = Fixture::new(
            "name,url\n\
             First,https://youtu.be/aaaaaaaaaaa\n\
             Second,https://youtu.be/bbbbbbbbbbb\n",
        );

        let mut store = RowStateStore::open(&fixture.table).unwrap();
        let first = fixture
            .orchestrator(transcriber_returning("text", 2), false)
            .run(&mut store)
            .await
            .unwrap();
        assert_eq!(first.successful, 2);
        let outputs_after_first = fixture.files("out");
        let table_after_first = fs_err::read_to_string(&fixture.table).unwrap();

        let mut store = RowStateStore::open(&fixture.table).unwrap();
        let second = fixture
            .orchestrator(transcriber_returning("text", 0), false)
            .run(&mut store)
            .await
            .unwrap();

        assert_eq!((second.successful, second.failed, second.skipped), (0, 0, 2));
        assert_eq!(fixture.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.files("out"), outputs_after_first);
        assert_eq!(fs_err::read_to_string(&fixture.table).unwrap(), table_after_first);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_row_pending() {
        let fixture = Fixture::new("name,url\nBroken,https://youtu.be/ccccccccccc\n");
        let orchestrator = fixture.orchestrator(transcriber_returning("unused", 0), true);

        let mut store = RowStateStore::open(&fixture.table).unwrap();
        let stats = orchestrator.run(&mut store).await.unwrap();

        assert_eq!((stats.successful, stats.failed, stats.skipped), (0, 1, 0));
        assert!(fixture.files("out").is_empty());
        assert!(fixture.files("temp").is_empty());
        assert!(!RowStateStore::open(&fixture.table).unwrap().is_processed(0));
    }

    #[tokio::test]
    async fn test_transcription_failure_cleans_up_audio() {
        let fixture = Fixture::new("name,url\nTalk,https://youtu.be/ddddddddddd\n");
        let mut mock = MockTranscriber::new();
        mock.expect_transcribe()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("service unavailable")));
        let orchestrator = fixture.orchestrator(mock, false);

        let mut store = RowStateStore::open(&fixture.table).unwrap();
        let stats = orchestrator.run(&mut store).await.unwrap();

        assert_eq!(stats.failed, 1);
        assert!(fixture.files("temp").is_empty());
        assert!(fixture.files("out").is_empty());
        assert!(!store.is_processed(0));
    }

    #[tokio::test]
    async fn test_failed_row_does_not_stop_batch() {
        let fixture = Fixture::new(
            "name,url\n\
             Bad,https://youtu.be/eeeeeeeeeee\n\
             Good,https://youtu.be/fffffffffff\n",
        );
        let mut mock = MockTranscriber::new();
        let mut calls = 0;
        mock.expect_transcribe().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(anyhow::anyhow!("HTTP 500"))
            } else {
                Ok(TranscriptionResult::new("good text"))
            }
        });
        let orchestrator = fixture.orchestrator(mock, false);

        let mut store = RowStateStore::open(&fixture.table).unwrap();
        let stats = orchestrator.run(&mut store).await.unwrap();

        assert_eq!((stats.successful, stats.failed), (1, 1));
        assert!(!store.is_processed(0));
        assert!(store.is_processed(1));
        assert_eq!(fixture.files("out"), BTreeSet::from(["Good.txt".to_string()]));
    }

    #[tokio::test]
    async fn test_kept_audio_stays_in_temp_dir() {
        let fixture = Fixture::new("name,url\nTalk,https://youtu.be/ggggggggggg\n");
        let orchestrator = fixture
            .orchestrator(transcriber_returning("t", 1), false)
            .keep_audio(true);

        let mut store = RowStateStore::open(&fixture.table).unwrap();
        orchestrator.run(&mut store).await.unwrap();

        assert_eq!(fixture.files("temp"), BTreeSet::from(["Talk.mp4".to_string()]));
    }

    #[tokio::test]
    async fn test_persist_failure_aborts_run() {
        let fixture = Fixture::new("name,url\nunused,https://youtu.be/hhhhhhhhhhh\n");
        let table_dir = fixture.dir.path().join("tables");
        fs_err::create_dir(&table_dir).unwrap();
        let table = table_dir.join("videos.csv");
        fs_err::write(
            &table,
            "name,url\nOne,https://youtu.be/iiiiiiiiiii\nTwo,https://youtu.be/jjjjjjjjjjj\n",
        )
        .unwrap();

        let mut store = RowStateStore::open(&table).unwrap();
        fs_err::remove_dir_all(&table_dir).unwrap();

        let orchestrator = fixture.orchestrator(transcriber_returning("t", 1), false);
        let err = orchestrator.run(&mut store).await.unwrap_err();

        assert!(format!("{err:#}").contains("Failed to record completion of row 2"));
        assert_eq!(fixture.fetch_calls.load(Ordering::SeqCst), 1);
    }
}
