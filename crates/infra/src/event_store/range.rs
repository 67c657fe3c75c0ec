//! Bounded, single-stream reads.

use futures::TryStreamExt;
use tracing::{Span, instrument};

use commitlog_core::StreamName;
use commitlog_events::{CommitDecoder, StoredEvent};

use super::filter::range_filter;
use super::query::{DEFAULT_PAGE_SIZE, QueryError};
use super::r#trait::CommitLog;

/// One-shot read of a stream from a given offset.
///
/// The whole result is materialised, so this suits moderate stream sizes;
/// tail unbounded streams with [`ContinuousQuery`](super::ContinuousQuery).
#[derive(Debug, Clone)]
pub struct RangeQuery<L> {
    log: L,
    page_size: usize,
}

impl<L> RangeQuery<L>
where
    L: CommitLog,
{
    pub fn new(log: L) -> Self {
        Self {
            log,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// All events of `stream` with offset `>= from_offset`, in stream order.
    ///
    /// Offsets start at 1; a `from_offset` of 0 reads the whole stream.
    #[instrument(skip(self), fields(event_count), err)]
    pub async fn query(&self, stream: &str, from_offset: u64) -> Result<Vec<StoredEvent>, QueryError> {
        let stream = StreamName::new(stream)?;
        let from_offset = from_offset.max(1);

        let mut commits = self.log.scan(range_filter(&stream, from_offset), self.page_size);
        let mut events = Vec::new();
        while let Some(commit) = commits.try_next().await? {
            events.extend(CommitDecoder::from_offset(&commit, from_offset));
        }

        Span::current().record("event_count", events.len());
        Ok(events)
    }
}
