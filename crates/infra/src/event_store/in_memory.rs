use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use commitlog_core::{CommitId, StreamName, storage_resolution};
use commitlog_events::{Commit, Event};

use super::filter::CommitFilter;
use super::r#trait::{CommitLog, CommitPosition, CommitStream, StoreError, paged, position_of};

#[derive(Debug, Default)]
struct LogState {
    /// Sorted by (timestamp, checkpoint).
    commits: Vec<Commit>,
    /// Per stream: last offset and timestamp of the newest commit.
    heads: HashMap<StreamName, (u64, DateTime<Utc>)>,
    last_checkpoint: u64,
    indexed: BTreeSet<String>,
}

/// In-memory commit log.
///
/// Intended for tests/dev. Not optimized for performance.
///
/// `insert()` is a fixture: it assigns the starting offset (from the stream
/// head) and the checkpoint (global counter), then publishes the checkpoint on
/// the notifier channel. Timestamps may not go backwards within a stream, so
/// timestamp order is always offset order.
#[derive(Debug, Clone)]
pub struct InMemoryCommitLog {
    state: Arc<RwLock<LogState>>,
    notify: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryCommitLog {
    fn default() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            state: Arc::default(),
            notify: Arc::new(notify),
        }
    }
}

impl InMemoryCommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit of `events` to `stream` at `timestamp`.
    pub fn insert(
        &self,
        stream: &str,
        timestamp: DateTime<Utc>,
        events: Vec<Event>,
    ) -> Result<Commit, StoreError> {
        let stream =
            StreamName::new(stream).map_err(|e| StoreError::InvalidCommit(e.to_string()))?;

        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        let timestamp = storage_resolution(timestamp);
        let starting_offset = match state.heads.get(&stream) {
            Some((_, head_ts)) if *head_ts > timestamp => {
                return Err(StoreError::InvalidCommit(format!(
                    "stream '{stream}' already has a commit at {head_ts}, cannot append at {timestamp}"
                )));
            }
            Some((offset, _)) => *offset,
            None => 0,
        };
        let checkpoint = state.last_checkpoint + 1;

        let commit = Commit::new(
            CommitId::new(),
            stream.clone(),
            starting_offset,
            timestamp,
            checkpoint,
            events,
        )
        .map_err(|e| StoreError::InvalidCommit(e.to_string()))?;

        state.last_checkpoint = checkpoint;
        state.heads.insert(stream, (commit.ending_offset(), timestamp));

        let position = position_of(&commit);
        let at = state.commits.partition_point(|c| position_of(c) < position);
        state.commits.insert(at, commit.clone());
        drop(state);

        self.notify.send_replace(checkpoint);
        Ok(commit)
    }

    /// Receiver of the latest stored checkpoint, updated on every insert.
    pub fn notifier(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.commits.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata properties passed to `ensure_index()` so far.
    pub fn indexed_properties(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| s.indexed.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn page(
        &self,
        filter: &CommitFilter,
        after: Option<CommitPosition>,
        limit: usize,
    ) -> Result<Vec<Commit>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        let start = match after {
            Some(after) => state.commits.partition_point(|c| position_of(c) <= after),
            None => 0,
        };

        Ok(state.commits[start..]
            .iter()
            .filter(|c| filter.matches(c))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl CommitLog for InMemoryCommitLog {
    fn scan(&self, filter: CommitFilter, page_size: usize) -> CommitStream<'_> {
        let limit = page_size.max(1);
        paged(limit, move |after| {
            futures::future::ready(self.page(&filter, after, limit))
        })
    }

    async fn ensure_index(&self, metadata_property: &str) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        state.indexed.insert(metadata_property.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn events(n: usize) -> Vec<Event> {
        (0..n).map(|i| Event::new("e", json!({ "i": i }))).collect()
    }

    #[test]
    fn insert_assigns_offsets_and_checkpoints() {
        let log = InMemoryCommitLog::new();
        let a = log.insert("s", ts(100), events(2)).unwrap();
        let b = log.insert("t", ts(100), events(1)).unwrap();
        let c = log.insert("s", ts(101), events(3)).unwrap();

        assert_eq!((a.starting_offset(), a.checkpoint()), (0, 1));
        assert_eq!((b.starting_offset(), b.checkpoint()), (0, 2));
        assert_eq!((c.starting_offset(), c.checkpoint()), (2, 3));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn insert_rejects_empty_batches_and_names() {
        let log = InMemoryCommitLog::new();
        assert!(matches!(
            log.insert("s", ts(1), vec![]),
            Err(StoreError::InvalidCommit(_))
        ));
        assert!(matches!(
            log.insert("", ts(1), events(1)),
            Err(StoreError::InvalidCommit(_))
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn insert_rejects_timestamps_going_backwards_in_a_stream() {
        let log = InMemoryCommitLog::new();
        log.insert("s", ts(200), events(1)).unwrap();
        assert!(matches!(
            log.insert("s", ts(100), events(1)),
            Err(StoreError::InvalidCommit(_))
        ));
        // Same timestamp is fine; other streams are independent.
        log.insert("s", ts(200), events(1)).unwrap();
        log.insert("t", ts(100), events(1)).unwrap();
    }

    #[test]
    fn insert_publishes_checkpoint() {
        let log = InMemoryCommitLog::new();
        let rx = log.notifier();
        log.insert("s", ts(1), events(1)).unwrap();
        log.insert("s", ts(2), events(1)).unwrap();
        assert_eq!(*rx.borrow(), 2);
    }

    #[tokio::test]
    async fn scan_orders_by_timestamp_then_checkpoint_across_pages() {
        let log = InMemoryCommitLog::new();
        log.insert("a", ts(300), events(1)).unwrap();
        log.insert("b", ts(100), events(1)).unwrap();
        log.insert("c", ts(100), events(1)).unwrap();
        log.insert("b", ts(200), events(1)).unwrap();

        let scanned: Vec<Commit> = log.scan(CommitFilter::new(), 1).try_collect().await.unwrap();
        let order: Vec<(i64, u64)> = scanned
            .iter()
            .map(|c| (c.timestamp().timestamp(), c.checkpoint()))
            .collect();
        assert_eq!(order, vec![(100, 2), (100, 3), (200, 4), (300, 1)]);
    }

    #[tokio::test]
    async fn ensure_index_records_property() {
        let log = InMemoryCommitLog::new();
        log.ensure_index("causationId").await.unwrap();
        log.ensure_index("causationId").await.unwrap();
        assert_eq!(log.indexed_properties(), vec!["causationId".to_string()]);
    }
}
