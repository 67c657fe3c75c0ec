//! Long-lived consumers driven by repeated continuous queries.
//!
//! A subscription runs on a tokio task:
//! - runs a continuous query from the last acknowledged cursor
//! - waits for a commit notification, the poll interval, or shutdown
//! - retries storage failures after a backoff, stops on consumer failures
//!
//! Delivery is at-least-once across process restarts (persist
//! [`SubscriptionHandle::last_cursor`] and pass it back as `start`), and
//! exactly-once within one subscription's lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};

use commitlog_core::{Cursor, QuerySelector};
use commitlog_events::StoredEvent;

use crate::event_store::{CommitLog, ContinuousQuery, DEFAULT_PAGE_SIZE, QueryError};

/// Receiver of the latest stored checkpoint; a change means "new commits".
pub type CommitNotifier = watch::Receiver<u64>;

/// Consumer of a subscription.
///
/// `on_event` is awaited for one event at a time; returning `Ok(())`
/// acknowledges the event and advances the subscription's cursor.
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn on_event(&self, event: StoredEvent) -> anyhow::Result<()>;

    async fn on_started(&self) {}

    async fn on_error(&self, _error: &QueryError) {}

    async fn on_closed(&self) {}
}

#[async_trait::async_trait]
impl<S> Subscriber for Arc<S>
where
    S: Subscriber + ?Sized,
{
    async fn on_event(&self, event: StoredEvent) -> anyhow::Result<()> {
        (**self).on_event(event).await
    }

    async fn on_started(&self) {
        (**self).on_started().await
    }

    async fn on_error(&self, error: &QueryError) {
        (**self).on_error(error).await
    }

    async fn on_closed(&self) {
        (**self).on_closed().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub page_size: usize,
    /// Upper bound on the wait between rounds when no notification arrives.
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: Duration::from_millis(1000),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Handle to observe and stop a running subscription.
///
/// Dropping the handle cancels the subscription without waiting for it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    position: watch::Receiver<Option<Cursor>>,
    join: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Cursor of the last acknowledged event (or the start cursor).
    pub fn last_cursor(&self) -> Option<Cursor> {
        *self.position.borrow()
    }

    /// Watch channel of acknowledged cursors.
    pub fn cursor_updates(&self) -> watch::Receiver<Option<Cursor>> {
        self.position.clone()
    }

    /// The task stopped on its own (consumer failure or invalid selector).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request graceful shutdown and wait for the task to stop.
    ///
    /// Returns the last acknowledged cursor.
    pub async fn shutdown(mut self) -> Option<Cursor> {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }
        *self.position.borrow()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug)]
pub struct Subscription;

impl Subscription {
    /// Spawn a subscription task on the current tokio runtime.
    ///
    /// - `notifier`: optional wake-up channel; without one the task polls
    /// - `start`: resume point; `None` reads from the beginning of the log
    pub fn spawn<L, S>(
        engine: ContinuousQuery<L>,
        notifier: Option<CommitNotifier>,
        subscriber: S,
        selector: QuerySelector,
        start: Option<Cursor>,
        config: SubscriptionConfig,
    ) -> SubscriptionHandle
    where
        L: CommitLog + 'static,
        S: Subscriber,
    {
        let cancel = CancellationToken::new();
        let (position_tx, position_rx) = watch::channel(start);

        let span = info_span!("subscription", selector = ?selector);
        let worker = Worker {
            engine: engine.with_page_size(config.page_size),
            notifier,
            subscriber,
            selector,
            config,
            cancel: cancel.clone(),
            position: position_tx,
        };
        let join = tokio::spawn(worker.run().instrument(span));

        SubscriptionHandle {
            cancel,
            position: position_rx,
            join: Some(join),
        }
    }
}

struct Worker<L, S> {
    engine: ContinuousQuery<L>,
    notifier: Option<CommitNotifier>,
    subscriber: S,
    selector: QuerySelector,
    config: SubscriptionConfig,
    cancel: CancellationToken,
    position: watch::Sender<Option<Cursor>>,
}

impl<L, S> Worker<L, S>
where
    L: CommitLog,
    S: Subscriber,
{
    async fn run(mut self) {
        self.subscriber.on_started().await;

        while !self.cancel.is_cancelled() {
            // Anything committed from here on must trigger another round.
            if let Some(notifier) = self.notifier.as_mut() {
                notifier.borrow_and_update();
            }

            match self.round().await {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    warn!(
                        error = %err,
                        backoff_ms = self.config.retry_backoff.as_millis() as u64,
                        "subscription round failed, retrying"
                    );
                    self.subscriber.on_error(&err).await;
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_backoff) => continue,
                    }
                }
                Err(err) => {
                    error!(error = %err, "subscription stopped");
                    self.subscriber.on_error(&err).await;
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = wait_for_commit(&mut self.notifier) => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.subscriber.on_closed().await;
    }

    /// Deliver everything after the last acknowledged cursor.
    async fn round(&self) -> Result<(), QueryError> {
        let cursor = (*self.position.borrow()).unwrap_or_else(Cursor::beginning);
        let subscriber = &self.subscriber;
        let position = &self.position;

        let outcome = self
            .engine
            .query_cursor(&self.selector, cursor, &self.cancel, |event| async move {
                let at = event.cursor();
                let acked = subscriber.on_event(event).await;
                if acked.is_ok() {
                    position.send_replace(Some(at));
                }
                acked
            })
            .await?;

        debug!(
            delivered = outcome.delivered(),
            cancelled = outcome.is_cancelled(),
            "subscription round finished"
        );
        Ok(())
    }
}

/// Resolves when the notifier reports a new checkpoint. A closed notifier is
/// dropped, leaving only the poll interval.
async fn wait_for_commit(notifier: &mut Option<CommitNotifier>) {
    if let Some(rx) = notifier {
        if rx.changed().await.is_ok() {
            return;
        }
        debug!("commit notifier closed, falling back to polling");
        *notifier = None;
    }
    std::future::pending::<()>().await
}
