//! `commitlog-core` - value types shared by the commit log crates.
//!
//! This crate contains **pure** values (no storage, no async): stream and commit
//! identifiers, resumable cursors and their token codec, and selectors.

pub mod error;
pub mod id;
pub mod position;
pub mod selector;

pub use error::{CoreError, CoreResult};
pub use id::{CommitId, StreamName};
pub use position::{Cursor, storage_resolution};
pub use selector::{MATCH_ALL, PATTERN_ANCHOR, QuerySelector, StreamPattern, StreamSelector};
