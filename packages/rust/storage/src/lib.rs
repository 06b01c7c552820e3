//! Filesystem persistence for novelpull.
//!
//! Everything lives under one bookstore directory:
//!
//! ```text
//! bookstore/
//!   record.json                 ids of every work downloaded so far
//!   {name}-{id}/{name}.json     per-work snapshot (`_metadata` + chapter map)
//!   {name}-{id}/failures.txt    failure report of the last job, when it had failures
//! ```
//!
//! The [`Storage`] handle owns the root; per-work files go through [`WorkStore`];
//! a running job records outcomes through its [`Ledger`].

mod ledger;
mod store;

use std::path::{Path, PathBuf};

use novelpull_shared::{NovelPullError, Result, Snapshot, WorkId, WorkMeta};
use tracing::{debug, warn};

pub use ledger::{Ledger, LedgerReport, placeholder_for};
pub use store::{FAILURE_REPORT_FILE, WorkStore, sanitize_filename};

/// File listing downloaded work ids.
const RECORD_FILE: &str = "record.json";

/// A work found in the bookstore.
#[derive(Debug, Clone)]
pub struct StoredWork {
    pub work_id: WorkId,
    pub meta: Option<WorkMeta>,
    pub chapters: usize,
    pub store: WorkStore,
}

/// Handle on the bookstore directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open (creating if needed) the bookstore at `root`.
    pub async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| NovelPullError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store for `work_id`, reusing an existing directory for the id if there is one
    /// (the work may have been renamed since it was first downloaded).
    pub async fn work(&self, work_id: WorkId, name: &str) -> Result<WorkStore> {
        if let Some(existing) = self.find_work(work_id).await? {
            return Ok(existing);
        }
        Ok(WorkStore::new(&self.root, work_id, name))
    }

    /// Locate the directory of an already-downloaded work.
    pub async fn find_work(&self, work_id: WorkId) -> Result<Option<WorkStore>> {
        let suffix = format!("-{work_id}");
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NovelPullError::io(&self.root, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| NovelPullError::io(&self.root, e))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = file_name.strip_suffix(&suffix) else {
                continue;
            };
            let dir = entry.path();
            let snapshot_path = dir.join(format!("{stem}.json"));
            if snapshot_path.is_file() {
                debug!(dir = %dir.display(), "found existing work directory");
                return Ok(Some(WorkStore::existing(work_id, dir, snapshot_path)));
            }
        }
        Ok(None)
    }

    /// Every work with a readable snapshot, sorted by name.
    pub async fn list_works(&self) -> Result<Vec<StoredWork>> {
        let mut works = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(works),
            Err(e) => return Err(NovelPullError::io(&self.root, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| NovelPullError::io(&self.root, e))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some((stem, id)) = file_name.rsplit_once('-') else {
                continue;
            };
            let Ok(work_id) = id.parse::<u64>().map(WorkId) else {
                continue;
            };
            let dir = entry.path();
            let snapshot_path = dir.join(format!("{stem}.json"));
            if !snapshot_path.is_file() {
                continue;
            }

            let store = WorkStore::existing(work_id, dir, snapshot_path);
            match store.load().await {
                Ok(Some(Snapshot { meta, chapters })) => works.push(StoredWork {
                    work_id,
                    meta,
                    chapters: chapters.len(),
                    store,
                }),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping unreadable snapshot"),
            }
        }

        works.sort_by(|a, b| {
            let name = |w: &StoredWork| w.meta.as_ref().map(|m| m.name.clone()).unwrap_or_default();
            name(a).cmp(&name(b)).then(a.work_id.cmp(&b.work_id))
        });
        Ok(works)
    }

    /// Add `work_id` to `record.json` (no-op if present).
    pub async fn record_download(&self, work_id: WorkId) -> Result<()> {
        let mut ids = self.recorded_works().await?;
        if ids.contains(&work_id) {
            return Ok(());
        }
        ids.push(work_id);

        let path = self.root.join(RECORD_FILE);
        let as_strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let json = serde_json::to_string_pretty(&as_strings)
            .map_err(|e| NovelPullError::Storage(format!("failed to serialize record: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| NovelPullError::io(&path, e))
    }

    /// Work ids from `record.json`, in the order they were first downloaded.
    pub async fn recorded_works(&self) -> Result<Vec<WorkId>> {
        let path = self.root.join(RECORD_FILE);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(NovelPullError::io(&path, e)),
        };

        let raw: Vec<String> = serde_json::from_str(&json).map_err(|e| {
            NovelPullError::Storage(format!("corrupt {}: {e}", path.display()))
        })?;
        raw.iter().map(|id| id.parse::<WorkId>()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novelpull_shared::ContentMap;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let root = std::env::temp_dir().join(format!("np-storage-{}", Uuid::now_v7()));
        Storage::open(&root).await.expect("open bookstore")
    }

    async fn save_work(storage: &Storage, id: u64, name: &str, chapters: usize) -> WorkStore {
        let store = WorkStore::new(storage.root(), WorkId(id), name);
        let mut map = ContentMap::new();
        for i in 0..chapters {
            map.insert(format!("第{}章", i + 1), "正文").unwrap();
        }
        store
            .save(&Snapshot {
                meta: Some(WorkMeta::now(WorkId(id), name, None)),
                chapters: map,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn record_is_deduplicated_and_ordered() {
        let storage = test_storage().await;
        assert!(storage.recorded_works().await.unwrap().is_empty());

        storage.record_download(WorkId(3)).await.unwrap();
        storage.record_download(WorkId(1)).await.unwrap();
        storage.record_download(WorkId(3)).await.unwrap();

        assert_eq!(
            storage.recorded_works().await.unwrap(),
            vec![WorkId(3), WorkId(1)]
        );
    }

    #[tokio::test]
    async fn lists_stored_works() {
        let storage = test_storage().await;
        save_work(&storage, 2, "乙书", 3).await;
        save_work(&storage, 1, "甲书", 1).await;
        tokio::fs::create_dir_all(storage.root().join("stray-dir"))
            .await
            .unwrap();

        let works = storage.list_works().await.unwrap();
        assert_eq!(works.len(), 2);
        let chapters: Vec<_> = works.iter().map(|w| (w.work_id.0, w.chapters)).collect();
        assert!(chapters.contains(&(2, 3)));
        assert!(chapters.contains(&(1, 1)));
    }

    #[tokio::test]
    async fn renamed_work_reuses_existing_directory() {
        let storage = test_storage().await;
        let original = save_work(&storage, 77, "旧名", 2).await;

        let store = storage.work(WorkId(77), "新名").await.unwrap();
        assert_eq!(store.snapshot_path(), original.snapshot_path());

        let fresh = storage.work(WorkId(78), "新书").await.unwrap();
        assert!(fresh.dir().ends_with("新书-78"));
    }
}
