//! Shared types, error model, and configuration for novelpull.
//!
//! This crate is the foundation depended on by all other novelpull crates.
//! It provides:
//! - [`NovelPullError`], the unified job-level error type, and [`FetchError`] /
//!   [`ErrorKind`] for chapter-level failures
//! - Domain types ([`WorkId`], [`ChapterRef`], [`ChapterOutcome`], [`ContentMap`], [`Snapshot`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], [`SessionPolicy`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ContentConfig, CookieMode, DelayMode, DirectoriesConfig, FetchConfig,
    FormatsConfig, MULTIPLIER_CEILING, NetworkConfig, PacingConfig, PerformanceConfig,
    SessionConfig, SessionPolicy, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_config,
};
pub use error::{ErrorKind, FetchError, NovelPullError, Result};
pub use types::{
    ChapterNumber, ChapterOutcome, ChapterRef, ContentMap, FailureReason, FailureRecord,
    METADATA_KEY, OrderedChapter, PLACEHOLDER_TEXT, RESERVED_PREFIX, Snapshot, WorkId, WorkMeta,
};
