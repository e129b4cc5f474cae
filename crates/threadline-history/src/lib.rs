//! Rebuilds a thread's conversation from its archived runs.
//!
//! Run logs are fetched through a [`RunSource`], completed logs are kept in a
//! bounded [`RunEventCache`], and everything is folded through the same
//! reducer that drives live streaming.

pub mod cache;
pub mod reconstructor;
pub mod source;

pub use cache::{CacheStats, RunEventCache, RunEvents};
pub use reconstructor::HistoryReconstructor;
pub use source::{HttpRunSource, RunInfo, RunSource, RunState};
