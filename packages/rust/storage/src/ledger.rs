//! Progress and failure ledger for a single job.
//!
//! The ledger is owned by exactly one task (the orchestrator's coordinator) and
//! receives every chapter outcome. It keeps:
//!
//! - the persisted content map (real chapter text only, never placeholders), which
//!   is snapshotted to disk every `snapshot_every` completions
//! - one outcome slot per resolved chapter
//! - the failure log
//!
//! [`Ledger::finish`] merges with whatever is on disk, writes the final snapshot and
//! failure report, and returns the job's [`ContentMap`] with exactly one entry per
//! resolved chapter.

use std::path::PathBuf;

use novelpull_shared::{
    ChapterOutcome, ChapterRef, ContentMap, FailureReason, FailureRecord, NovelPullError,
    PLACEHOLDER_TEXT, Result, Snapshot, WorkMeta,
};
use tracing::{debug, info, warn};

use crate::store::WorkStore;

/// Placeholder body recorded for a failed chapter.
pub fn placeholder_for(reason: &FailureReason) -> String {
    format!("{PLACEHOLDER_TEXT}（{}）", reason.last_cause)
}

/// Result of a finished job.
#[derive(Debug, Clone)]
pub struct LedgerReport {
    pub meta: WorkMeta,
    /// One entry per resolved chapter, in resolution order.
    pub content: ContentMap,
    pub failures: Vec<FailureRecord>,
    /// Chapters retrieved during this job.
    pub fetched: usize,
    /// Chapters taken verbatim from an earlier snapshot.
    pub reused: usize,
    pub failed: usize,
    pub snapshot_path: PathBuf,
    pub failure_report: Option<PathBuf>,
}

pub struct Ledger {
    store: WorkStore,
    meta: WorkMeta,
    chapters: Vec<ChapterRef>,
    outcomes: Vec<Option<ChapterOutcome>>,
    persisted: ContentMap,
    failures: Vec<FailureRecord>,
    snapshot_every: usize,
    completed: usize,
    reused: usize,
}

impl Ledger {
    /// Start a job. Chapters whose title is already in `previous` are marked done
    /// with the stored content and never reach [`Ledger::pending`].
    pub fn new(
        store: WorkStore,
        meta: WorkMeta,
        chapters: Vec<ChapterRef>,
        previous: Option<Snapshot>,
        snapshot_every: usize,
    ) -> Self {
        let persisted = previous.map(|s| s.chapters).unwrap_or_default();

        let outcomes: Vec<Option<ChapterOutcome>> = chapters
            .iter()
            .map(|chapter| {
                persisted.get(&chapter.title).map(|content| ChapterOutcome::Success {
                    content: content.to_string(),
                })
            })
            .collect();
        let reused = outcomes.iter().filter(|o| o.is_some()).count();

        if reused > 0 {
            info!(reused, total = chapters.len(), "resuming from snapshot");
        }

        Self {
            store,
            meta,
            chapters,
            outcomes,
            persisted,
            failures: Vec::new(),
            snapshot_every,
            completed: 0,
            reused,
        }
    }

    /// Chapters that still need an outcome, in resolution order.
    pub fn pending(&self) -> Vec<ChapterRef> {
        self.chapters
            .iter()
            .zip(&self.outcomes)
            .filter(|(_, outcome)| outcome.is_none())
            .map(|(chapter, _)| chapter.clone())
            .collect()
    }

    pub fn has_outcome(&self, ordinal: usize) -> bool {
        self.outcomes.get(ordinal).is_some_and(Option::is_some)
    }

    pub fn total(&self) -> usize {
        self.chapters.len()
    }

    /// Outcomes recorded during this job (excludes reused chapters).
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn reused(&self) -> usize {
        self.reused
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Record the single outcome of `chapter`. Snapshots on cadence; a failed
    /// snapshot write is returned to the caller as a job failure.
    pub async fn record(&mut self, chapter: &ChapterRef, outcome: ChapterOutcome) -> Result<()> {
        let slot = match self.chapters.get(chapter.ordinal) {
            Some(known) if known.title == chapter.title => &mut self.outcomes[chapter.ordinal],
            _ => {
                return Err(NovelPullError::validation(format!(
                    "chapter '{}' (#{}) is not part of this job",
                    chapter.title, chapter.ordinal
                )));
            }
        };
        if slot.is_some() {
            return Err(NovelPullError::validation(format!(
                "chapter '{}' already has an outcome",
                chapter.title
            )));
        }

        match &outcome {
            ChapterOutcome::Success { content } => {
                self.persisted.insert(chapter.title.clone(), content.clone())?;
            }
            ChapterOutcome::Failure { reason } => {
                warn!(title = %chapter.title, %reason, "chapter failed");
                self.failures.push(FailureRecord {
                    title: chapter.title.clone(),
                    remote_id: chapter.remote_id.clone(),
                    reason: reason.clone(),
                });
            }
        }
        *slot = Some(outcome);
        self.completed += 1;

        if self.snapshot_every > 0 && self.completed % self.snapshot_every == 0 {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write the current persisted content map.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = Snapshot {
            meta: Some(self.meta.clone()),
            chapters: self.persisted.clone(),
        };
        self.store.save(&snapshot).await
    }

    /// Close the job: merge with the on-disk snapshot, write the final snapshot
    /// and failure report, and assemble the job's content map.
    pub async fn finish(mut self) -> Result<LedgerReport> {
        let outcomes: Vec<ChapterOutcome> = self.outcomes.iter().flatten().cloned().collect();
        if outcomes.len() != self.chapters.len() {
            return Err(NovelPullError::validation(format!(
                "{} chapter(s) finished without an outcome",
                self.chapters.len() - outcomes.len()
            )));
        }

        // Chapters written by an earlier job stay, even if no longer listed.
        let on_disk = self.store.load().await?.map(|s| s.chapters).unwrap_or_default();
        let mut merged = ContentMap::new();
        for chapter in &self.chapters {
            if let Some(content) = on_disk.get(&chapter.title).or(self.persisted.get(&chapter.title)) {
                merged.insert(chapter.title.clone(), content)?;
            }
        }
        for (title, content) in on_disk.iter().chain(self.persisted.iter()) {
            if !merged.contains(title) {
                merged.insert(title, content)?;
            }
        }

        self.meta.touch();
        self.store
            .save(&Snapshot {
                meta: Some(self.meta.clone()),
                chapters: merged,
            })
            .await?;

        let mut content = ContentMap::new();
        let mut fetched = 0;
        for (chapter, outcome) in self.chapters.iter().zip(outcomes) {
            let body = match outcome {
                ChapterOutcome::Success { content } => {
                    fetched += 1;
                    content
                }
                ChapterOutcome::Failure { reason } => placeholder_for(&reason),
            };
            content.insert(chapter.title.clone(), body)?;
        }
        let fetched = fetched - self.reused;

        let failure_report = self.store.write_failure_report(&self.failures).await?;
        debug!(
            total = content.len(),
            fetched,
            reused = self.reused,
            failed = self.failures.len(),
            "ledger closed"
        );

        Ok(LedgerReport {
            meta: self.meta,
            content,
            failed: self.failures.len(),
            failures: self.failures,
            fetched,
            reused: self.reused,
            snapshot_path: self.store.snapshot_path().to_path_buf(),
            failure_report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novelpull_shared::{ErrorKind, WorkId};
    use std::path::Path;
    use uuid::Uuid;

    fn chapters(n: usize) -> Vec<ChapterRef> {
        (0..n)
            .map(|i| ChapterRef {
                title: format!("第{}章", i + 1),
                remote_id: format!("{}", 100 + i),
                ordinal: i,
            })
            .collect()
    }

    fn store() -> WorkStore {
        let root = std::env::temp_dir().join(format!("np-ledger-{}", Uuid::now_v7()));
        WorkStore::new(&root, WorkId(5), "账本")
    }

    fn meta() -> WorkMeta {
        WorkMeta::now(WorkId(5), "账本", Some("连载中".into()))
    }

    fn failure() -> ChapterOutcome {
        ChapterOutcome::Failure {
            reason: FailureReason {
                kind: ErrorKind::RetriesExhausted,
                last_cause: ErrorKind::TransportError,
                attempts: 3,
                detail: "connection reset".into(),
            },
        }
    }

    fn success(text: &str) -> ChapterOutcome {
        ChapterOutcome::Success {
            content: text.into(),
        }
    }

    #[tokio::test]
    async fn snapshots_every_n_completions() {
        let store = store();
        let list = chapters(7);
        let mut ledger = Ledger::new(store.clone(), meta(), list.clone(), None, 5);

        for chapter in &list[..4] {
            ledger.record(chapter, success("正文")).await.unwrap();
        }
        assert!(store.load().await.unwrap().is_none());

        ledger.record(&list[4], success("正文")).await.unwrap();
        let snapshot = store.load().await.unwrap().unwrap();
        assert_eq!(snapshot.chapters.len(), 5);
        assert_eq!(snapshot.meta.unwrap().name, "账本");
    }

    #[tokio::test]
    async fn finish_has_one_entry_per_chapter_and_placeholders_for_failures() {
        let store = store();
        let list = chapters(3);
        let mut ledger = Ledger::new(store.clone(), meta(), list.clone(), None, 5);

        ledger.record(&list[2], success("三")).await.unwrap();
        ledger.record(&list[0], success("一")).await.unwrap();
        ledger.record(&list[1], failure()).await.unwrap();

        let report = ledger.finish().await.unwrap();
        let titles: Vec<_> = report.content.titles().collect();
        assert_eq!(titles, vec!["第1章", "第2章", "第3章"]);
        let placeholder = report.content.get("第2章").unwrap();
        assert!(placeholder.starts_with(PLACEHOLDER_TEXT));
        assert!(placeholder.contains("transport_error"));
        assert_eq!((report.fetched, report.reused, report.failed), (2, 0, 1));
        assert!(report.failure_report.is_some());

        // Placeholders never reach the snapshot.
        let snapshot = store.load().await.unwrap().unwrap();
        assert_eq!(snapshot.chapters.len(), 2);
        assert!(!snapshot.chapters.contains("第2章"));
    }

    #[tokio::test]
    async fn previous_snapshot_chapters_are_reused() {
        let store = store();
        let mut previous = ContentMap::new();
        previous.insert("第1章", "旧一").unwrap();
        previous.insert("第2章", "旧二").unwrap();
        previous.insert("番外", "不在列表中").unwrap();
        let previous = Snapshot {
            meta: Some(meta()),
            chapters: previous,
        };

        let list = chapters(4);
        let mut ledger = Ledger::new(store.clone(), meta(), list.clone(), Some(previous), 5);
        let pending: Vec<_> = ledger.pending().into_iter().map(|c| c.ordinal).collect();
        assert_eq!(pending, vec![2, 3]);
        assert!(ledger.has_outcome(0));

        ledger.record(&list[2], success("三")).await.unwrap();
        ledger.record(&list[3], success("四")).await.unwrap();
        let report = ledger.finish().await.unwrap();

        assert_eq!(report.content.get("第1章"), Some("旧一"));
        assert_eq!((report.fetched, report.reused), (2, 2));
        assert!(report.failure_report.is_none());

        let snapshot = store.load().await.unwrap().unwrap();
        assert!(snapshot.chapters.contains("番外"));
        assert_eq!(snapshot.chapters.len(), 5);
    }

    #[tokio::test]
    async fn duplicate_outcome_is_rejected() {
        let list = chapters(2);
        let mut ledger = Ledger::new(store(), meta(), list.clone(), None, 0);
        ledger.record(&list[0], success("一")).await.unwrap();
        assert!(ledger.record(&list[0], success("一")).await.is_err());
    }

    #[tokio::test]
    async fn finish_requires_every_outcome() {
        let list = chapters(2);
        let mut ledger = Ledger::new(store(), meta(), list.clone(), None, 0);
        ledger.record(&list[0], success("一")).await.unwrap();
        assert!(ledger.finish().await.is_err());
    }

    #[tokio::test]
    async fn snapshot_write_failure_propagates() {
        // A regular file where the bookstore directory should be.
        let blocker = std::env::temp_dir().join(format!("np-blocker-{}", Uuid::now_v7()));
        std::fs::write(&blocker, b"x").unwrap();
        let store = WorkStore::new(Path::new(&blocker), WorkId(5), "账本");

        let list = chapters(1);
        let mut ledger = Ledger::new(store, meta(), list.clone(), None, 1);
        assert!(ledger.record(&list[0], success("一")).await.is_err());
    }
}
