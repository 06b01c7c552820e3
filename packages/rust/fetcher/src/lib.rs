//! Remote retrieval for novelpull.
//!
//! - [`source`]: the [`ContentSource`] seam and its HTTP implementation
//! - [`session`]: cookie rotation and the adaptive delay multiplier
//! - [`catalog`]: chapter list resolution
//! - [`engine`]: the worker pool that fetches, decodes, and retries chapters
//! - [`pacing`]: backoff and post-success delays

pub mod catalog;
pub mod engine;
pub mod pacing;
pub mod session;
pub mod source;

pub use catalog::{SkipReason, SkippedAnchor, WorkCatalog, resolve};
pub use engine::{ChapterRun, FetchProgress, NoProgress, Orchestrator, RunSummary};
pub use pacing::{Pacer, PauseKind, TokioPacer};
pub use session::{Outcome, RotationTrigger, SessionManager, SessionState};
pub use source::{ContentSource, FetchResult, HttpSource, RequestHeaders};
