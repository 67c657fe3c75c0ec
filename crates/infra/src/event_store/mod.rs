//! Read side of the commit log.
//!
//! The [`CommitLog`] trait is the storage boundary; [`RangeQuery`] and
//! [`ContinuousQuery`] are the query engines built on top of it. Engines hold
//! nothing but the log handle, so they are cheap to clone and safe to share.

pub mod continuous;
pub mod filter;
pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod range;
pub mod r#trait;

pub use continuous::ContinuousQuery;
pub use filter::{Clause, CommitFilter, continuous_filter, metadata_path, position_clause, range_filter};
pub use in_memory::InMemoryCommitLog;
pub use postgres::PostgresCommitLog;
pub use query::{DEFAULT_PAGE_SIZE, QueryError, ScanOutcome};
pub use range::RangeQuery;
pub use r#trait::{CommitLog, CommitPosition, CommitStream, StoreError};
