//! End-to-end download job: work id → chapter list → fetch → ledger → formatters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Span, field, info, instrument, warn};
use uuid::Uuid;

use novelpull_decoder::Charset;
use novelpull_fetcher::{
    ContentSource, FetchProgress, HttpSource, Orchestrator, SessionManager, SkippedAnchor, resolve,
};
use novelpull_formats::{FormatInput, FormatOptions, Formatter, formatters_for};
use novelpull_shared::{
    AppConfig, ChapterRef, ContentMap, FailureRecord, FetchConfig, NovelPullError, Result,
    SessionPolicy, WorkId, WorkMeta,
};
use novelpull_storage::{Ledger, Storage};

use crate::assembly::assemble_ordered;

/// Everything a download job needs, derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub fetch: FetchConfig,
    pub session: SessionPolicy,
    pub charset: Arc<Charset>,
    /// Snapshots, failure reports, `record.json`.
    pub bookstore_dir: PathBuf,
    /// Formatter output.
    pub download_dir: PathBuf,
    /// Formatter names to run.
    pub formats: Vec<String>,
    pub format_options: FormatOptions,
}

impl DownloadOptions {
    /// Build options from the config file, loading the charset tables if configured.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let charset = match &config.content.charset_path {
            Some(path) => Charset::load(&PathBuf::from(path))?,
            None => {
                warn!("no content.charset_path configured, obfuscated text will not decode");
                Charset::empty()
            }
        };

        Ok(Self {
            fetch: FetchConfig::from(config),
            session: SessionPolicy::from(config),
            charset: Arc::new(charset),
            bookstore_dir: PathBuf::from(&config.directories.bookstore_dir),
            download_dir: PathBuf::from(&config.directories.download_dir),
            formats: config.formats.enabled.clone(),
            format_options: FormatOptions::from(config),
        })
    }
}

/// Result of one download job.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub job_id: Uuid,
    pub work_id: WorkId,
    pub name: String,
    pub status: String,
    /// Resolved chapter count; `content` has exactly this many entries.
    pub chapters: usize,
    pub fetched: usize,
    pub reused: usize,
    pub failed: usize,
    pub failures: Vec<FailureRecord>,
    pub skipped_anchors: Vec<SkippedAnchor>,
    pub content: ContentMap,
    pub snapshot_path: PathBuf,
    pub failure_report: Option<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Progress callback for reporting job status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the number of chapters to fetch is known.
    fn chapters_started(&self, total: usize);
    /// Called as each chapter gets its outcome.
    fn chapter_done(&self, title: &str, success: bool, done: usize, total: usize);
    /// Called when the job completes.
    fn done(&self, result: &DownloadResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn chapters_started(&self, _total: usize) {}
    fn chapter_done(&self, _title: &str, _success: bool, _done: usize, _total: usize) {}
    fn done(&self, _result: &DownloadResult) {}
}

/// Download one work over HTTP.
pub async fn download_work(
    options: &DownloadOptions,
    work: WorkId,
    progress: &dyn ProgressReporter,
) -> Result<DownloadResult> {
    let source: Arc<dyn ContentSource> = Arc::new(HttpSource::new(&options.fetch)?);
    download_work_with(source, options, work, progress).await
}

/// Download one work from `source`.
///
/// 1. Resolve the chapter list (job-fatal on failure)
/// 2. Load the previous snapshot and skip chapters it already holds
/// 3. Fetch the rest with the worker pool, snapshotting as it goes
/// 4. Merge, write the final snapshot and failure report
/// 5. Run the enabled formatters
#[instrument(skip_all, fields(work_id = %work, job_id = field::Empty))]
pub async fn download_work_with(
    source: Arc<dyn ContentSource>,
    options: &DownloadOptions,
    work: WorkId,
    progress: &dyn ProgressReporter,
) -> Result<DownloadResult> {
    let start = Instant::now();
    let job_id = Uuid::now_v7();
    Span::current().record("job_id", field::display(job_id));

    // Fail on a bad format name before doing any network work.
    let formatters = formatters_for(&options.formats, &options.format_options)?;

    // --- Phase 1: Chapter list ---
    progress.phase("Resolving chapter list");
    let session = Arc::new(SessionManager::new(source.clone(), options.session.clone()));
    let catalog = resolve(source.as_ref(), &session, work).await?;

    // --- Phase 2: Snapshot ---
    progress.phase("Loading snapshot");
    let storage = Storage::open(&options.bookstore_dir).await?;
    let store = storage.work(work, &catalog.name).await?;
    let previous = store.load().await?;
    let meta = WorkMeta::now(work, &catalog.name, Some(catalog.status.clone()));
    let mut ledger = Ledger::new(
        store,
        meta,
        catalog.chapters.clone(),
        previous,
        options.fetch.snapshot_every,
    );

    // --- Phase 3: Fetch ---
    let pending = ledger.pending().len();
    info!(
        total = catalog.chapters.len(),
        pending,
        reused = ledger.reused(),
        "starting download"
    );
    progress.phase("Downloading chapters");
    progress.chapters_started(pending);
    if let Some(probe) = catalog.chapters.first() {
        let orchestrator = Orchestrator::new(
            options.fetch.clone(),
            source,
            session,
            options.charset.clone(),
        );
        let adapter = PipelineFetchProgress { inner: progress };
        orchestrator.run(&mut ledger, probe, &adapter).await?;
    }

    // --- Phase 4: Ledger ---
    progress.phase("Saving snapshot");
    let report = ledger.finish().await?;
    storage.record_download(work).await?;

    // --- Phase 5: Output ---
    progress.phase("Writing output");
    let outputs = write_outputs(
        formatters,
        report.meta.clone(),
        report.content.clone(),
        options.download_dir.clone(),
    )
    .await?;

    let result = DownloadResult {
        job_id,
        work_id: work,
        name: catalog.name,
        status: catalog.status,
        chapters: report.content.len(),
        fetched: report.fetched,
        reused: report.reused,
        failed: report.failed,
        failures: report.failures,
        skipped_anchors: catalog.skipped,
        content: report.content,
        snapshot_path: report.snapshot_path,
        failure_report: report.failure_report,
        outputs,
        elapsed: start.elapsed(),
    };

    if result.failed > 0 {
        warn!(
            failed = result.failed,
            report = ?result.failure_report,
            "download finished with failed chapters"
        );
    }
    info!(
        chapters = result.chapters,
        fetched = result.fetched,
        reused = result.reused,
        failed = result.failed,
        elapsed_ms = result.elapsed.as_millis(),
        "download complete"
    );

    progress.done(&result);
    Ok(result)
}

/// Adapts [`ProgressReporter`] to the orchestrator's per-chapter callback.
struct PipelineFetchProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl FetchProgress for PipelineFetchProgress<'_> {
    fn chapter_done(&self, chapter: &ChapterRef, success: bool, done: usize, total: usize) {
        self.inner.chapter_done(&chapter.title, success, done, total);
    }
}

/// Run `formatters` in order on the blocking pool, since they write with `std::fs`.
async fn write_outputs(
    formatters: Vec<Box<dyn Formatter>>,
    meta: WorkMeta,
    content: ContentMap,
    download_dir: PathBuf,
) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || {
        let ordered = assemble_ordered(&content);
        let input = FormatInput {
            meta: &meta,
            content: &content,
            ordered: &ordered,
        };
        let mut outputs = Vec::new();
        for formatter in &formatters {
            outputs.extend(formatter.write(&input, &download_dir)?);
        }
        Ok(outputs)
    })
    .await
    .map_err(|e| NovelPullError::Storage(format!("formatter task failed: {e}")))?
}
