use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use commitlog_core::{CommitId, CoreError, StreamName, storage_resolution};

use crate::event::Event;

/// Upper bound on events in one commit (intra-commit indexes are `i32` in cursors).
pub const MAX_COMMIT_EVENTS: usize = i32::MAX as usize;

/// An immutable batch of events appended atomically to one stream.
///
/// Offsets:
/// - `starting_offset` is the last stream offset *before* this commit (0 for the
///   first commit of a stream)
/// - the i-th event (1-based) of the commit has stream offset `starting_offset + i`
///
/// Ordering: commits are read by (`timestamp`, `checkpoint`). `checkpoint` is
/// assigned by the log and strictly increases with every stored commit, so it
/// breaks ties between commits that share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CommitRecord")]
pub struct Commit {
    commit_id: CommitId,
    stream: StreamName,
    starting_offset: u64,
    timestamp: DateTime<Utc>,
    checkpoint: u64,
    events: Vec<Event>,
}

impl Commit {
    /// Build a commit, truncating the timestamp to storage resolution.
    ///
    /// Rejects empty and oversized batches.
    pub fn new(
        commit_id: CommitId,
        stream: StreamName,
        starting_offset: u64,
        timestamp: DateTime<Utc>,
        checkpoint: u64,
        events: Vec<Event>,
    ) -> Result<Self, CoreError> {
        if events.is_empty() {
            return Err(CoreError::invalid_argument(format!(
                "commit {commit_id} for stream '{stream}' has no events"
            )));
        }
        if events.len() > MAX_COMMIT_EVENTS {
            return Err(CoreError::invalid_argument(format!(
                "commit {commit_id} has {} events (max {MAX_COMMIT_EVENTS})",
                events.len()
            )));
        }

        Ok(Self {
            commit_id,
            stream,
            starting_offset,
            timestamp: storage_resolution(timestamp),
            checkpoint,
            events,
        })
    }

    pub fn commit_id(&self) -> CommitId {
        self.commit_id
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    pub fn starting_offset(&self) -> u64 {
        self.starting_offset
    }

    /// Stream offset of the last event in this commit.
    pub fn ending_offset(&self) -> u64 {
        self.starting_offset + self.events.len() as u64
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event_count(&self) -> u32 {
        // Bounded by MAX_COMMIT_EVENTS at construction.
        self.events.len() as u32
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Wire shape of a [`Commit`]; decoded records go through [`Commit::new`].
#[derive(Deserialize)]
struct CommitRecord {
    commit_id: CommitId,
    stream: StreamName,
    starting_offset: u64,
    timestamp: DateTime<Utc>,
    checkpoint: u64,
    events: Vec<Event>,
}

impl TryFrom<CommitRecord> for Commit {
    type Error = CoreError;

    fn try_from(r: CommitRecord) -> Result<Self, Self::Error> {
        Self::new(
            r.commit_id,
            r.stream,
            r.starting_offset,
            r.timestamp,
            r.checkpoint,
            r.events,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream() -> StreamName {
        StreamName::new("orders-1").unwrap()
    }

    #[test]
    fn empty_commit_is_rejected() {
        let err = Commit::new(CommitId::new(), stream(), 0, Utc::now(), 1, vec![]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn ending_offset_counts_events() {
        let events = vec![
            Event::new("a", json!({})),
            Event::new("b", json!({})),
            Event::new("c", json!({})),
        ];
        let commit = Commit::new(CommitId::new(), stream(), 4, Utc::now(), 1, events).unwrap();
        assert_eq!(commit.event_count(), 3);
        assert_eq!(commit.ending_offset(), 7);
    }

    #[test]
    fn deserialization_validates_like_new() {
        let id = CommitId::new();
        let empty = json!({
            "commit_id": id,
            "stream": "orders-1",
            "starting_offset": 0,
            "timestamp": "2024-01-01T00:00:00.123456789Z",
            "checkpoint": 1,
            "events": [],
        });
        assert!(serde_json::from_value::<Commit>(empty).is_err());

        let one = json!({
            "commit_id": id,
            "stream": "orders-1",
            "starting_offset": 0,
            "timestamp": "2024-01-01T00:00:00.123456789Z",
            "checkpoint": 1,
            "events": [Event::new("a", json!({}))],
        });
        let commit: Commit = serde_json::from_value(one).unwrap();
        assert_eq!(commit.timestamp().timestamp_subsec_nanos(), 123_456_000);
    }
}
