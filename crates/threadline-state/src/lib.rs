//! Pure state transitions for Threadline conversations.
//!
//! Nothing in this crate performs I/O, reads a clock or suspends. The same
//! functions drive live streaming and history replay.

pub mod citations;
pub mod patch;
pub mod reducer;

pub use citations::{citation_list, extract_new_citations};
pub use patch::{apply_patch, PatchError};
pub use reducer::{fold_events, reduce};
