use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

use commitlog_events::Commit;

use super::filter::CommitFilter;

/// Lazy, ascending sequence of commits produced by a [`CommitLog`] scan.
pub type CommitStream<'a> = BoxStream<'a, Result<Commit, StoreError>>;

/// Storage read failure.
///
/// These are **infrastructure errors** reported by the backing log. The query
/// engines never retry them; retry policy belongs to the subscription layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage timed out: {0}")]
    Timeout(String),

    #[error("corrupt commit record: {0}")]
    Corrupt(String),

    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Read side of an append-only commit log.
///
/// The log owns all shared mutable state (the commits themselves) and
/// serializes writers; readers are free to scan concurrently.
///
/// ## Scan Semantics
///
/// `scan()`:
/// - returns only commits matching every clause of the filter
/// - orders commits ascending by (`timestamp`, `checkpoint`)
/// - is lazy: commits are fetched a page at a time as the stream is polled
/// - starts a fresh scan on every call (no server-side cursor survives it)
///
/// ## Indexing
///
/// `ensure_index()` creates (idempotently) whatever index serves
/// metadata-equality filters on the given property.
#[async_trait::async_trait]
pub trait CommitLog: Send + Sync {
    fn scan(&self, filter: CommitFilter, page_size: usize) -> CommitStream<'_>;

    async fn ensure_index(&self, metadata_property: &str) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<L> CommitLog for Arc<L>
where
    L: CommitLog + ?Sized,
{
    fn scan(&self, filter: CommitFilter, page_size: usize) -> CommitStream<'_> {
        (**self).scan(filter, page_size)
    }

    async fn ensure_index(&self, metadata_property: &str) -> Result<(), StoreError> {
        (**self).ensure_index(metadata_property).await
    }
}

/// Position of a commit in scan order.
pub type CommitPosition = (DateTime<Utc>, u64);

pub(crate) fn position_of(commit: &Commit) -> CommitPosition {
    (commit.timestamp(), commit.checkpoint())
}

struct PageState<F> {
    fetch: F,
    after: Option<CommitPosition>,
    buffer: VecDeque<Commit>,
    exhausted: bool,
}

/// Turn a page fetcher into a lazy commit stream using keyset pagination.
///
/// `fetch(after)` must return up to `page_size` matching commits positioned
/// strictly after `after` (or from the start when `None`), in scan order. A
/// short page ends the scan.
pub(crate) fn paged<'a, F, Fut>(page_size: usize, fetch: F) -> CommitStream<'a>
where
    F: FnMut(Option<CommitPosition>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Vec<Commit>, StoreError>> + Send + 'a,
{
    let page_size = page_size.max(1);
    let state = PageState {
        fetch,
        after: None,
        buffer: VecDeque::new(),
        exhausted: false,
    };

    stream::try_unfold(state, move |mut state| async move {
        loop {
            if let Some(commit) = state.buffer.pop_front() {
                return Ok(Some((commit, state)));
            }
            if state.exhausted {
                return Ok(None);
            }

            let page = (state.fetch)(state.after).await?;
            state.exhausted = page.len() < page_size;
            if let Some(last) = page.last() {
                state.after = Some(position_of(last));
            }
            state.buffer.extend(page);
        }
    })
    .boxed()
}
