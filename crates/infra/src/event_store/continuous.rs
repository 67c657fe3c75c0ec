//! Resumable, cancellable scans across streams.
//!
//! A scan delivers one event at a time to an async callback and only moves on
//! once the callback's future completes, so the consumer's acknowledgement is
//! the future resolving `Ok(())`. The last acknowledged cursor is the resume
//! point: re-running from it yields exactly the remaining suffix.

use std::future::Future;

use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use commitlog_core::{Cursor, QuerySelector};
use commitlog_events::{CommitDecoder, StoredEvent};

use super::filter::continuous_filter;
use super::query::{DEFAULT_PAGE_SIZE, QueryError, ScanOutcome};
use super::r#trait::CommitLog;

#[derive(Debug, Clone)]
pub struct ContinuousQuery<L> {
    log: L,
    page_size: usize,
}

impl<L> ContinuousQuery<L>
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

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Scan events matching `selector` positioned after `cursor_token`.
    ///
    /// A missing or blank token starts from the beginning of the log; a
    /// malformed one fails with [`QueryError::InvalidPosition`] before any I/O.
    pub async fn query<F, Fut>(
        &self,
        selector: &QuerySelector,
        cursor_token: Option<&str>,
        cancel: &CancellationToken,
        callback: F,
    ) -> Result<ScanOutcome, QueryError>
    where
        F: FnMut(StoredEvent) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let cursor = Cursor::decode(cursor_token)?;
        self.query_cursor(selector, cursor, cancel, callback).await
    }

    /// Same as [`query`](Self::query) with an already decoded cursor.
    #[instrument(skip(self, cancel, callback), fields(delivered), err(level = "warn"))]
    pub async fn query_cursor<F, Fut>(
        &self,
        selector: &QuerySelector,
        cursor: Cursor,
        cancel: &CancellationToken,
        mut callback: F,
    ) -> Result<ScanOutcome, QueryError>
    where
        F: FnMut(StoredEvent) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let filter = continuous_filter(selector, &cursor);
        debug!(%filter, "starting continuous scan");

        let mut commits = self.log.scan(filter, self.page_size);
        let mut last = None;
        let mut delivered = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(cancelled(last, delivered));
                }
                next = commits.try_next() => next?,
            };
            let Some(commit) = next else {
                break;
            };

            for event in CommitDecoder::after(&commit, cursor) {
                if cancel.is_cancelled() {
                    return Ok(cancelled(last, delivered));
                }
                let position = event.cursor();
                callback(event).await.map_err(QueryError::CallbackFailure)?;
                last = Some(position);
                delivered += 1;
            }
        }

        tracing::Span::current().record("delivered", delivered);
        Ok(ScanOutcome::Exhausted { last, delivered })
    }
}

fn cancelled(last: Option<Cursor>, delivered: u64) -> ScanOutcome {
    debug!(delivered, "continuous scan cancelled");
    ScanOutcome::Cancelled { last, delivered }
}
