//! Incremental update of every work already in the bookstore.
//!
//! Each known work is re-downloaded; the snapshot makes this incremental, so only
//! chapters added upstream (or that failed last time) are fetched. One work
//! failing does not stop the others.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use novelpull_fetcher::{ContentSource, HttpSource};
use novelpull_shared::{Result, WorkId};
use novelpull_storage::Storage;

use crate::pipeline::{DownloadOptions, DownloadResult, ProgressReporter, download_work_with};

/// Outcome of an update run across all known works.
#[derive(Debug)]
pub struct UpdateReport {
    /// Works that completed, in work-id order.
    pub results: Vec<DownloadResult>,
    /// Works whose job failed, with the error message.
    pub errors: Vec<(WorkId, String)>,
    pub elapsed: Duration,
}

impl UpdateReport {
    /// Chapters newly fetched across all works.
    pub fn fetched(&self) -> usize {
        self.results.iter().map(|r| r.fetched).sum()
    }
}

/// Every work id the bookstore knows: `record.json` plus snapshot directories.
pub async fn known_works(storage: &Storage) -> Result<Vec<WorkId>> {
    let mut ids: BTreeSet<WorkId> = storage.recorded_works().await?.into_iter().collect();
    ids.extend(storage.list_works().await?.into_iter().map(|w| w.work_id));
    Ok(ids.into_iter().collect())
}

/// Update every known work over HTTP.
pub async fn update_all(
    options: &DownloadOptions,
    progress: &dyn ProgressReporter,
) -> Result<UpdateReport> {
    let source: Arc<dyn ContentSource> = Arc::new(HttpSource::new(&options.fetch)?);
    update_all_with(source, options, progress).await
}

/// Update every known work from `source`.
#[instrument(skip_all)]
pub async fn update_all_with(
    source: Arc<dyn ContentSource>,
    options: &DownloadOptions,
    progress: &dyn ProgressReporter,
) -> Result<UpdateReport> {
    let start = Instant::now();
    let storage = Storage::open(&options.bookstore_dir).await?;
    let works = known_works(&storage).await?;
    info!(works = works.len(), "updating known works");

    let mut results = Vec::with_capacity(works.len());
    let mut errors = Vec::new();
    for work in works {
        match download_work_with(source.clone(), options, work, progress).await {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(work_id = %work, error = %e, "update failed");
                errors.push((work, e.to_string()));
            }
        }
    }

    let report = UpdateReport {
        results,
        errors,
        elapsed: start.elapsed(),
    };
    info!(
        updated = report.results.len(),
        failed = report.errors.len(),
        fetched = report.fetched(),
        "update complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use novelpull_shared::AppConfig;
    use std::path::PathBuf;
    use uuid::Uuid;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(server: &MockServer, root: &std::path::Path) -> DownloadOptions {
        let mut config = AppConfig::default();
        config.network.base_url = server.uri();
        config.network.backoff_ms = vec![0];
        config.performance.delay_mode = novelpull_shared::DelayMode::Custom;
        config.performance.custom_delay = [0, 0];
        config.performance.dwell_ms = [0, 0];
        config.session.probe_interval_ms = 0;
        config.formats.enabled = vec![];

        let mut options = DownloadOptions::from_config(&config).unwrap();
        options.bookstore_dir = root.join("bookstore");
        options.download_dir = root.join("downloads");
        options
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("np-update-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn known_works_merges_record_and_directories() {
        let root = temp_root();
        let storage = Storage::open(&root).await.unwrap();
        storage.record_download(WorkId(9)).await.unwrap();
        storage.record_download(WorkId(3)).await.unwrap();
        std::fs::create_dir_all(root.join("旧书-5")).unwrap();
        std::fs::write(root.join("旧书-5").join("旧书.json"), "{}").unwrap();

        let ids = known_works(&storage).await.unwrap();
        assert_eq!(ids, vec![WorkId(3), WorkId(5), WorkId(9)]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn one_failing_work_does_not_stop_the_rest() {
        let server = MockServer::start().await;
        let root = temp_root();

        Mock::given(path("/page/1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/page/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<h1>二号书</h1><span class="info-label-yellow">已完结</span>
                <div class="chapter"><div><a href="/reader/201">第1章 始</a></div></div>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(path("/reader/201"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="muye-reader-content"><p>风从山那边吹过来，带着雪的味道。</p></div>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let options = options(&server, &root);
        let storage = Storage::open(&options.bookstore_dir).await.unwrap();
        storage.record_download(WorkId(1)).await.unwrap();
        storage.record_download(WorkId(2)).await.unwrap();

        let report = update_all(&options, &SilentProgress).await.unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].work_id, WorkId(2));
        assert_eq!(report.fetched(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, WorkId(1));
        assert!(report.errors[0].1.contains("chapter list unavailable"));

        let _ = std::fs::remove_dir_all(&root);
    }
}
