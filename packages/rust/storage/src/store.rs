//! Per-work snapshot and failure report files.

use std::path::{Path, PathBuf};

use novelpull_shared::{FailureRecord, NovelPullError, Result, Snapshot, WorkId};
use tracing::debug;

/// File name of the per-work failure report.
pub const FAILURE_REPORT_FILE: &str = "failures.txt";

/// Replace characters that are not allowed in file names with full-width lookalikes.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '<' => '＜',
            '>' => '＞',
            ':' => '：',
            '"' => '＂',
            '/' => '／',
            '\\' => '＼',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Location of one work's persisted state: `{root}/{name}-{id}/{name}.json`.
#[derive(Debug, Clone)]
pub struct WorkStore {
    work_id: WorkId,
    dir: PathBuf,
    snapshot_path: PathBuf,
}

impl WorkStore {
    pub fn new(root: &Path, work_id: WorkId, name: &str) -> Self {
        let safe = sanitize_filename(name);
        let dir = root.join(format!("{safe}-{work_id}"));
        let snapshot_path = dir.join(format!("{safe}.json"));
        Self {
            work_id,
            dir,
            snapshot_path,
        }
    }

    /// Open an existing work directory whose snapshot file name is already known.
    pub(crate) fn existing(work_id: WorkId, dir: PathBuf, snapshot_path: PathBuf) -> Self {
        Self {
            work_id,
            dir,
            snapshot_path,
        }
    }

    pub fn work_id(&self) -> WorkId {
        self.work_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn failure_report_path(&self) -> PathBuf {
        self.dir.join(FAILURE_REPORT_FILE)
    }

    /// Read the snapshot, if one has been written.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let json = match tokio::fs::read_to_string(&self.snapshot_path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NovelPullError::io(&self.snapshot_path, e)),
        };

        let snapshot: Snapshot = serde_json::from_str(&json).map_err(|e| {
            NovelPullError::Storage(format!(
                "corrupt snapshot {}: {e}",
                self.snapshot_path.display()
            ))
        })?;
        Ok(Some(snapshot))
    }

    /// Write the snapshot atomically (temp file, then rename).
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| NovelPullError::io(&self.dir, e))?;

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| NovelPullError::Storage(format!("failed to serialize snapshot: {e}")))?;

        let tmp = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| NovelPullError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.snapshot_path)
            .await
            .map_err(|e| NovelPullError::io(&self.snapshot_path, e))?;

        debug!(
            path = %self.snapshot_path.display(),
            chapters = snapshot.chapters.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Write one `title\tremote_id\treason` line per failure.
    ///
    /// With no failures, a stale report from an earlier job is removed and `None` is returned.
    pub async fn write_failure_report(&self, failures: &[FailureRecord]) -> Result<Option<PathBuf>> {
        let path = self.failure_report_path();

        if failures.is_empty() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed stale failure report"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(NovelPullError::io(&path, e)),
            }
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| NovelPullError::io(&self.dir, e))?;

        let mut report = String::new();
        for failure in failures {
            report.push_str(&report_field(&failure.title));
            report.push('\t');
            report.push_str(&report_field(&failure.remote_id));
            report.push('\t');
            report.push_str(&report_field(&failure.reason.to_string()));
            report.push('\n');
        }

        tokio::fs::write(&path, report)
            .await
            .map_err(|e| NovelPullError::io(&path, e))?;
        Ok(Some(path))
    }
}

fn report_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use novelpull_shared::{ContentMap, ErrorKind, FailureReason, WorkMeta};
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("np-store-{}", Uuid::now_v7()))
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b:c?"), "a／b：c？");
        assert_eq!(sanitize_filename("  "), "untitled");
        assert_eq!(sanitize_filename("斗破苍穹"), "斗破苍穹");
    }

    #[test]
    fn layout_uses_name_and_id() {
        let store = WorkStore::new(Path::new("/tmp/bookstore"), WorkId(42), "书/名");
        assert_eq!(store.dir(), Path::new("/tmp/bookstore/书／名-42"));
        assert_eq!(
            store.snapshot_path(),
            Path::new("/tmp/bookstore/书／名-42/书／名.json")
        );
    }

    #[tokio::test]
    async fn load_missing_snapshot_is_none() {
        let store = WorkStore::new(&temp_root(), WorkId(1), "无");
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = WorkStore::new(&temp_root(), WorkId(7), "测试");
        let mut chapters = ContentMap::new();
        chapters.insert("第1章 开端", "正文").unwrap();
        let snapshot = Snapshot {
            meta: Some(WorkMeta::now(WorkId(7), "测试", None)),
            chapters,
        };

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(!store.snapshot_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_storage_error() {
        let store = WorkStore::new(&temp_root(), WorkId(8), "坏");
        tokio::fs::create_dir_all(store.dir()).await.unwrap();
        tokio::fs::write(store.snapshot_path(), "{not json").await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, NovelPullError::Storage(_)));
    }

    #[tokio::test]
    async fn failure_report_lines_and_cleanup() {
        let store = WorkStore::new(&temp_root(), WorkId(9), "报告");
        let failures = vec![FailureRecord {
            title: "第3章\t坏".into(),
            remote_id: "300".into(),
            reason: FailureReason {
                kind: ErrorKind::RetriesExhausted,
                last_cause: ErrorKind::TransportError,
                attempts: 3,
                detail: "timeout".into(),
            },
        }];

        let path = store.write_failure_report(&failures).await.unwrap().unwrap();
        let report = tokio::fs::read_to_string(&path).await.unwrap();
        let fields: Vec<&str> = report.trim_end().split('\t').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0], "第3章 坏");
        assert_eq!(fields[1], "300");
        assert!(fields[2].contains("transport_error"));

        assert!(store.write_failure_report(&[]).await.unwrap().is_none());
        assert!(!path.exists());
    }
}
