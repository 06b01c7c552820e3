//! Concurrent chapter retrieval.
//!
//! A fixed pool of worker tasks claims chapters from a shared queue. Each worker
//! runs the per-chapter retry loop and sends the single outcome to the coordinator,
//! which owns the [`Ledger`] and is therefore the only writer of job progress.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument, warn};

use novelpull_decoder::{Charset, DecodeStrategy};
use novelpull_shared::{
    ChapterOutcome, ChapterRef, ErrorKind, FailureReason, FetchConfig, FetchError, Result,
};
use novelpull_storage::Ledger;

use crate::pacing::{Pacer, PauseKind, TokioPacer, backoff_for, success_delays};
use crate::session::{Outcome, RotationTrigger, SessionManager};
use crate::source::{ContentSource, FetchResult, RequestHeaders};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Per-chapter progress callback, invoked by the coordinator.
pub trait FetchProgress: Send + Sync {
    fn chapter_done(&self, chapter: &ChapterRef, success: bool, done: usize, total: usize);
}

/// No-op [`FetchProgress`].
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn chapter_done(&self, _: &ChapterRef, _: bool, _: usize, _: usize) {}
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Summary of one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Outcome of one chapter together with how it got there.
#[derive(Debug, Clone)]
pub struct ChapterRun {
    pub outcome: ChapterOutcome,
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Inner {
    config: FetchConfig,
    source: Arc<dyn ContentSource>,
    session: Arc<SessionManager>,
    charset: Arc<Charset>,
    pacer: Arc<dyn Pacer>,
}

/// Worker pool driving chapters through fetch, decode, and retry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: FetchConfig,
        source: Arc<dyn ContentSource>,
        session: Arc<SessionManager>,
        charset: Arc<Charset>,
    ) -> Self {
        Self::with_pacer(config, source, session, charset, Arc::new(TokioPacer))
    }

    pub fn with_pacer(
        config: FetchConfig,
        source: Arc<dyn ContentSource>,
        session: Arc<SessionManager>,
        charset: Arc<Charset>,
        pacer: Arc<dyn Pacer>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                session,
                charset,
                pacer,
            }),
        }
    }

    /// Fetch every pending chapter of `ledger` and record each outcome in it.
    ///
    /// `probe` is the chapter used to validate new cookies during rotation.
    /// Only a ledger write failure aborts the run.
    #[instrument(skip_all, fields(workers = self.inner.config.worker_count))]
    pub async fn run(
        &self,
        ledger: &mut Ledger,
        probe: &ChapterRef,
        progress: &dyn FetchProgress,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let pending = ledger.pending();
        let total = pending.len();
        if total == 0 {
            info!("nothing to fetch");
            return Ok(RunSummary {
                attempted: 0,
                succeeded: 0,
                failed: 0,
                duration: start.elapsed(),
            });
        }

        let queue = Arc::new(Mutex::new(pending.iter().cloned().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::unbounded_channel::<(ChapterRef, ChapterRun)>();
        let worker_count = self.inner.config.worker_count.clamp(1, total);
        info!(chapters = total, worker_count, "starting chapter workers");

        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let inner = self.inner.clone();
            let queue = queue.clone();
            let tx = tx.clone();
            let probe = probe.clone();
            handles.push(tokio::spawn(async move {
                inner.worker_loop(worker, queue, tx, probe).await;
            }));
        }
        drop(tx);

        let mut succeeded = 0;
        let mut failed = 0;
        let mut done = 0;
        while let Some((chapter, run)) = rx.recv().await {
            let success = run.outcome.is_success();
            if let Err(e) = ledger.record(&chapter, run.outcome).await {
                for handle in &handles {
                    handle.abort();
                }
                return Err(e);
            }
            done += 1;
            if success {
                succeeded += 1;
            } else {
                failed += 1;
            }
            progress.chapter_done(&chapter, success, done, total);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "chapter worker terminated abnormally");
            }
        }

        // A worker that died mid-chapter never reported; keep one outcome per chapter.
        let orphaned: Vec<&ChapterRef> = pending
            .iter()
            .filter(|c| !ledger.has_outcome(c.ordinal))
            .collect();
        for chapter in orphaned {
            let reason = FailureReason {
                kind: ErrorKind::RetriesExhausted,
                last_cause: ErrorKind::TransportError,
                attempts: 0,
                detail: "worker terminated before completing the chapter".into(),
            };
            ledger
                .record(chapter, ChapterOutcome::Failure { reason })
                .await?;
            failed += 1;
            done += 1;
            progress.chapter_done(chapter, false, done, total);
        }

        let summary = RunSummary {
            attempted: total,
            succeeded,
            failed,
            duration: start.elapsed(),
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = summary.duration.as_millis(),
            "chapter workers finished"
        );
        Ok(summary)
    }

    /// Run the retry loop for a single chapter.
    pub async fn fetch_chapter(&self, chapter: &ChapterRef, probe: &ChapterRef) -> ChapterRun {
        self.inner.fetch_chapter(chapter, probe).await
    }
}

impl Inner {
    async fn worker_loop(
        &self,
        worker: usize,
        queue: Arc<Mutex<VecDeque<ChapterRef>>>,
        tx: mpsc::UnboundedSender<(ChapterRef, ChapterRun)>,
        probe: ChapterRef,
    ) {
        loop {
            let next = queue.lock().await.pop_front();
            let Some(chapter) = next else {
                break;
            };
            let run = self.fetch_chapter(&chapter, &probe).await;
            if tx.send((chapter, run)).is_err() {
                debug!(worker, "coordinator gone, stopping");
                break;
            }
        }
    }

    async fn fetch_chapter(&self, chapter: &ChapterRef, probe: &ChapterRef) -> ChapterRun {
        let retry_count = self.config.retry_count.max(1);
        let mut last_error = FetchError::transport("no attempt made");

        for attempt in 1..=retry_count {
            let headers = self.session.current_headers().await;

            match self.attempt(chapter, &headers).await {
                Ok(content) => {
                    if let Some(trigger) = self.session.record_outcome(Outcome::Success).await {
                        self.session.rotate(probe, trigger).await;
                    }
                    self.pace().await;
                    debug!(title = %chapter.title, attempt, "chapter fetched");
                    return ChapterRun {
                        outcome: ChapterOutcome::Success { content },
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    debug!(title = %chapter.title, attempt, error = %e, "attempt failed");
                    let trigger = self.session.record_outcome(Outcome::Failure).await;
                    if e.kind == ErrorKind::SessionInvalid {
                        let trigger = RotationTrigger::SessionRejected;
                        self.session
                            .rotate_if_current(&headers.cookie, probe, trigger)
                            .await;
                    } else if let Some(trigger) = trigger {
                        self.session.rotate(probe, trigger).await;
                    }
                    last_error = e;

                    if attempt < retry_count {
                        let wait = backoff_for(&self.config.backoff, (attempt - 1) as usize);
                        self.pacer.pause(PauseKind::Backoff, wait).await;
                    }
                }
            }
        }

        ChapterRun {
            outcome: ChapterOutcome::Failure {
                reason: FailureReason {
                    kind: ErrorKind::RetriesExhausted,
                    last_cause: last_error.kind,
                    attempts: retry_count,
                    detail: last_error.message,
                },
            },
            attempts: retry_count,
        }
    }

    /// One attempt: primary endpoint, fallback on outright failure, then decode
    /// and length check.
    async fn attempt(&self, chapter: &ChapterRef, headers: &RequestHeaders) -> FetchResult<String> {
        let raw = match self.source.primary_chapter(&chapter.remote_id, headers).await {
            Ok(raw) => raw,
            Err(primary) => {
                debug!(title = %chapter.title, error = %primary, "primary failed, trying fallback");
                match self.source.fallback_chapter(&chapter.remote_id, headers).await {
                    Ok(raw) => raw,
                    Err(fallback) => return Err(primary.with_fallback(&fallback)),
                }
            }
        };

        let decoded = self.charset.decode_with_fallback(&raw);
        if decoded.strategy == DecodeStrategy::StrippedMarkup {
            warn!(title = %chapter.title, "chapter decoded by markup stripping");
        }

        let chars = decoded.text.trim().chars().count();
        if chars < self.config.min_content_chars {
            return Err(FetchError::short_content(format!(
                "decoded {chars} chars, need at least {}",
                self.config.min_content_chars
            )));
        }
        Ok(decoded.text)
    }

    async fn pace(&self) {
        let multiplier = self.session.delay_multiplier().await;
        let (base, dwell) = success_delays(&self.config.pacing, multiplier);
        self.pacer.pause(PauseKind::Pacing, base).await;
        self.pacer.pause(PauseKind::Dwell, dwell).await;
    }
}
