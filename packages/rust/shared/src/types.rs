//! Core domain types for a novelpull download job.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{ErrorKind, NovelPullError};

/// Prefix reserved for work-level metadata keys in a [`ContentMap`] document.
pub const RESERVED_PREFIX: char = '_';

/// Key under which [`WorkMeta`] is stored in a snapshot document.
pub const METADATA_KEY: &str = "_metadata";

/// Body written for chapters that could not be retrieved.
pub const PLACEHOLDER_TEXT: &str = "抱歉，当前章节下载失败或暂不可用";

// ---------------------------------------------------------------------------
// WorkId
// ---------------------------------------------------------------------------

/// Numeric identifier of a work on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkId {
    type Err = NovelPullError;

    /// Accepts a bare number (`7143038691944959011`) or a URL whose last path
    /// segment is the number (`https://fanqienovel.com/page/7143038691944959011?x=1`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let input = s.trim();
        let candidate = if input.starts_with("http://") || input.starts_with("https://") {
            let url = Url::parse(input)
                .map_err(|e| NovelPullError::validation(format!("invalid work URL '{input}': {e}")))?;
            url.path_segments()
                .and_then(|mut segments| segments.rfind(|seg| !seg.is_empty()))
                .map(str::to_string)
                .ok_or_else(|| {
                    NovelPullError::validation(format!("work URL '{input}' has no path segment"))
                })?
        } else {
            input.to_string()
        };

        candidate
            .parse::<u64>()
            .map(WorkId)
            .map_err(|_| NovelPullError::validation(format!("invalid work id: '{input}'")))
    }
}

// ---------------------------------------------------------------------------
// Chapters and outcomes
// ---------------------------------------------------------------------------

/// A chapter as resolved from the work's catalog page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Display title; the only human-visible key. Never empty.
    pub title: String,
    /// Remote chapter identifier (trailing segment of the anchor href).
    pub remote_id: String,
    /// Position in the resolved list.
    pub ordinal: usize,
}

/// Why a chapter ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Terminal classification (always `RetriesExhausted` for chapters that ran out of attempts).
    pub kind: ErrorKind,
    /// Classification of the last failed attempt.
    pub last_cause: ErrorKind,
    /// Number of attempts made.
    pub attempts: u32,
    /// Human-readable detail of the last failed attempt.
    pub detail: String,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s), last cause {}: {}",
            self.kind, self.attempts, self.last_cause, self.detail
        )
    }
}

/// Final outcome of one chapter's retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    Success { content: String },
    Failure { reason: FailureReason },
}

impl ChapterOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One line of the failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub title: String,
    pub remote_id: String,
    pub reason: FailureReason,
}

// ---------------------------------------------------------------------------
// WorkMeta
// ---------------------------------------------------------------------------

/// Work-level metadata stored under the reserved [`METADATA_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMeta {
    /// Work id, stored as a string.
    #[serde(rename = "novel_id")]
    pub work_id: String,
    /// Display name of the work.
    pub name: String,
    /// Serialisation status label (e.g. "连载中", "已完结").
    #[serde(default)]
    pub status: Option<String>,
    /// Local time of the last refresh, `%Y-%m-%d %H:%M:%S`.
    pub last_updated: String,
}

impl WorkMeta {
    /// Build metadata stamped with the current local time.
    pub fn now(work_id: WorkId, name: impl Into<String>, status: Option<String>) -> Self {
        Self {
            work_id: work_id.to_string(),
            name: name.into(),
            status,
            last_updated: local_timestamp(),
        }
    }

    /// Refresh `last_updated` to the current local time.
    pub fn touch(&mut self) {
        self.last_updated = local_timestamp();
    }
}

fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ---------------------------------------------------------------------------
// Ordered assembly
// ---------------------------------------------------------------------------

/// Chapter number parsed from a title.
///
/// `Unparsed` sorts before every parsed number and is distinct from `Number(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChapterNumber {
    Unparsed,
    Number(u32),
}

impl ChapterNumber {
    pub fn value(self) -> Option<u32> {
        match self {
            Self::Unparsed => None,
            Self::Number(n) => Some(n),
        }
    }
}

/// A chapter positioned by its numeral, as consumed by ordered formatters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedChapter {
    pub number: ChapterNumber,
    pub title: String,
    pub content: String,
    /// Inserted to fill a numbering gap; no such chapter was resolved.
    pub missing: bool,
}

// ---------------------------------------------------------------------------
// ContentMap
// ---------------------------------------------------------------------------

/// Insertion-ordered mapping from chapter title to content (or placeholder).
///
/// Titles beginning with [`RESERVED_PREFIX`] are rejected so they can never
/// collide with metadata keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl ContentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `title` is usable as a chapter key.
    pub fn is_reserved(title: &str) -> bool {
        title.starts_with(RESERVED_PREFIX)
    }

    /// Insert or replace a chapter. Replacing keeps the original position.
    pub fn insert(&mut self, title: impl Into<String>, content: impl Into<String>) -> crate::Result<()> {
        let title = title.into();
        if title.is_empty() {
            return Err(NovelPullError::validation("chapter title must not be empty"));
        }
        if Self::is_reserved(&title) {
            return Err(NovelPullError::validation(format!(
                "chapter title '{title}' uses the reserved '{RESERVED_PREFIX}' prefix"
            )));
        }
        let content = content.into();
        match self.index.get(&title) {
            Some(&pos) => self.entries[pos].1 = content,
            None => {
                self.index.insert(title.clone(), self.entries.len());
                self.entries.push((title, content));
            }
        }
        Ok(())
    }

    pub fn get(&self, title: &str) -> Option<&str> {
        self.index.get(title).map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn contains(&self, title: &str) -> bool {
        self.index.contains_key(title)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(title, content)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, c)| (t.as_str(), c.as_str()))
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }
}

impl Serialize for ContentMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (title, content) in &self.entries {
            map.serialize_entry(title, content)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The persisted per-work document: `_metadata` first, then chapters in order.
///
/// ```json
/// { "_metadata": { "novel_id": "7", "name": "...", ... }, "第1章 开端": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub meta: Option<WorkMeta>,
    pub chapters: ContentMap,
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.chapters.len() + usize::from(self.meta.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(meta) = &self.meta {
            map.serialize_entry(METADATA_KEY, meta)?;
        }
        for (title, content) in self.chapters.iter() {
            map.serialize_entry(title, content)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SnapshotVisitor;

        impl<'de> Visitor<'de> for SnapshotVisitor {
            type Value = Snapshot;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of chapter titles to content")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Snapshot, A::Error> {
                let mut meta = None;
                let mut chapters = ContentMap::new();

                while let Some(key) = access.next_key::<String>()? {
                    if key == METADATA_KEY {
                        meta = Some(access.next_value::<WorkMeta>()?);
                    } else if ContentMap::is_reserved(&key) {
                        // Unknown reserved key from a newer writer.
                        access.next_value::<de::IgnoredAny>()?;
                    } else {
                        let content = access.next_value::<String>()?;
                        chapters.insert(key, content).map_err(de::Error::custom)?;
                    }
                }

                Ok(Snapshot { meta, chapters })
            }
        }

        deserializer.deserialize_map(SnapshotVisitor)
    }
}
