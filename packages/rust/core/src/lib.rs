//! Download jobs for novelpull.
//!
//! This crate ties together chapter list resolution, the fetch orchestrator, the
//! snapshot ledger and the output formatters into end-to-end workflows
//! (`download_work`, `update_all`).

pub mod assembly;
pub mod pipeline;
pub mod update;
