//! Chapter list resolution from the work's catalog page.

use std::collections::HashSet;
use std::fmt;

use scraper::{ElementRef, Html, Selector};
use tracing::{info, instrument, warn};

use novelpull_shared::{ChapterRef, ContentMap, NovelPullError, Result, WorkId};

use crate::session::SessionManager;
use crate::source::ContentSource;

/// Why an anchor did not become a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyTitle,
    MissingId,
    ReservedTitle,
    DuplicateTitle,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmptyTitle => "empty title",
            Self::MissingId => "no chapter id in href",
            Self::ReservedTitle => "title uses the reserved prefix",
            Self::DuplicateTitle => "duplicate title",
        })
    }
}

/// An anchor that was dropped from the chapter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAnchor {
    /// Position among all anchors on the page.
    pub position: usize,
    pub title: String,
    pub href: Option<String>,
    pub reason: SkipReason,
}

/// A resolved work: display name, status, and ordered chapters.
#[derive(Debug, Clone)]
pub struct WorkCatalog {
    pub work_id: WorkId,
    pub name: String,
    pub status: String,
    pub chapters: Vec<ChapterRef>,
    pub skipped: Vec<SkippedAnchor>,
}

/// Fetch and parse the catalog page for `work`.
///
/// Any failure here is job-fatal and reported as `ListUnavailable`.
#[instrument(skip_all, fields(work_id = %work))]
pub async fn resolve(
    source: &dyn ContentSource,
    session: &SessionManager,
    work: WorkId,
) -> Result<WorkCatalog> {
    let headers = session.current_headers().await;
    let html = source
        .catalog_page(work, &headers)
        .await
        .map_err(|e| NovelPullError::list_unavailable(work, format!("catalog request failed: {e}")))?;

    let catalog = parse_catalog(work, &html)?;
    if !catalog.skipped.is_empty() {
        warn!(
            skipped = catalog.skipped.len(),
            "some chapter anchors were skipped"
        );
    }
    info!(
        name = %catalog.name,
        status = %catalog.status,
        chapters = catalog.chapters.len(),
        "chapter list resolved"
    );
    Ok(catalog)
}

/// Parse catalog HTML into a [`WorkCatalog`].
pub fn parse_catalog(work: WorkId, html: &str) -> Result<WorkCatalog> {
    let doc = Html::parse_document(html);
    let unavailable = |reason: &str| NovelPullError::list_unavailable(work, reason);

    let name = first_text(&doc, "h1").ok_or_else(|| unavailable("no work title on catalog page"))?;
    let status = first_text(&doc, "span.info-label-yellow")
        .ok_or_else(|| unavailable("no status marker on catalog page"))?;

    let anchor_selector = selector("div.chapter > div > a")?;
    let anchors: Vec<ElementRef<'_>> = doc.select(&anchor_selector).collect();
    if anchors.is_empty() {
        return Err(unavailable("no chapter anchors on catalog page"));
    }

    let mut chapters = Vec::with_capacity(anchors.len());
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();

    for (position, anchor) in anchors.into_iter().enumerate() {
        let title = normalize_whitespace(&anchor.text().collect::<String>());
        let href = anchor.value().attr("href").map(str::to_string);
        let remote_id = href.as_deref().and_then(chapter_id_from_href);

        let reason = if title.is_empty() {
            Some(SkipReason::EmptyTitle)
        } else if ContentMap::is_reserved(&title) {
            Some(SkipReason::ReservedTitle)
        } else if remote_id.is_none() {
            Some(SkipReason::MissingId)
        } else if seen.contains(&title) {
            Some(SkipReason::DuplicateTitle)
        } else {
            None
        };

        match (reason, remote_id) {
            (None, Some(remote_id)) => {
                seen.insert(title.clone());
                chapters.push(ChapterRef {
                    title,
                    remote_id,
                    ordinal: chapters.len(),
                });
            }
            (reason, _) => skipped.push(SkippedAnchor {
                position,
                title,
                href,
                reason: reason.unwrap_or(SkipReason::MissingId),
            }),
        }
    }

    Ok(WorkCatalog {
        work_id: work,
        name,
        status,
        chapters,
        skipped,
    })
}

/// Trailing path segment of an anchor href, with any query or fragment removed.
pub fn chapter_id_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/')
        .next()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| NovelPullError::parse(format!("bad selector '{css}': {e}")))
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    doc.select(&selector)
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div class="info"><h1> 测试小说 </h1><span class="info-label-yellow">连载中</span></div>
        <div class="chapter">
            <div><a href="/reader/1001">第1章 开端</a></div>
            <div><a href="/reader/1002?enter=x">第2章 转折</a></div>
            <div><a href="/reader/">无编号</a></div>
            <div><a href="/reader/1004">  </a></div>
            <div><a href="/reader/1005">_metadata</a></div>
            <div><a href="/reader/1006">第1章 开端</a></div>
            <div><a href="/reader/1007">第4章 终章</a></div>
        </div>
    </body></html>"#;

    #[test]
    fn parses_anchors_and_reports_skips() {
        let catalog = parse_catalog(WorkId(7), PAGE).unwrap();
        assert_eq!(catalog.name, "测试小说");
        assert_eq!(catalog.status, "连载中");

        let titles: Vec<_> = catalog.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["第1章 开端", "第2章 转折", "第4章 终章"]);
        let ids: Vec<_> = catalog.chapters.iter().map(|c| c.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["1001", "1002", "1007"]);
        let ordinals: Vec<_> = catalog.chapters.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);

        let reasons: Vec<_> = catalog.skipped.iter().map(|s| (s.position, s.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                (2, SkipReason::MissingId),
                (3, SkipReason::EmptyTitle),
                (4, SkipReason::ReservedTitle),
                (5, SkipReason::DuplicateTitle),
            ]
        );
    }

    #[test]
    fn missing_markers_make_list_unavailable() {
        let no_anchors = r#"<h1>书</h1><span class="info-label-yellow">已完结</span>"#;
        let err = parse_catalog(WorkId(1), no_anchors).unwrap_err();
        assert!(matches!(err, NovelPullError::ListUnavailable { .. }));

        let no_status = r#"<h1>书</h1><div class="chapter"><div><a href="/reader/1">第1章</a></div></div>"#;
        let err = parse_catalog(WorkId(1), no_status).unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    #[test]
    fn chapter_id_is_trailing_segment() {
        assert_eq!(chapter_id_from_href("/reader/123").as_deref(), Some("123"));
        assert_eq!(chapter_id_from_href("https://x.com/reader/9?a=b").as_deref(), Some("9"));
        assert_eq!(chapter_id_from_href("/reader/#top"), None);
        assert_eq!(chapter_id_from_href(""), None);
    }
}
