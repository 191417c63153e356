//! Pagespace core: pure URL rewriting, output layout and run bookkeeping.
mod config;
mod layout;
mod phase;
mod rewrite;
mod summary;

pub use config::{ConfigError, Credentials, ExportConfig, ExportRun, DEFAULT_CONCURRENCY};
pub use layout::{normalized_path, page_file_path, resource_file_path};
pub use phase::{PhaseError, RunPhase};
pub use rewrite::{
    anchor_to_relative, is_local, is_page_relative, page_depth, resolve_against_page, to_relative,
};
pub use summary::ExportSummary;
