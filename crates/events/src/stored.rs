use serde::{Deserialize, Serialize};

use commitlog_core::{Cursor, StreamName};

use crate::event::Event;

/// An event handed to a reader, positioned both in its stream and in the log.
///
/// Notes:
/// - `offset` is the absolute stream offset (1-based, gap-free per stream).
/// - `cursor` is the resumable log position of this event; pass it back to a
///   continuous query to continue strictly after it.
/// - Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    cursor: Cursor,
    stream: StreamName,
    offset: u64,
    event: Event,
}

impl StoredEvent {
    pub fn new(cursor: Cursor, stream: StreamName, offset: u64, event: Event) -> Self {
        Self {
            cursor,
            stream,
            offset,
            event,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn into_event(self) -> Event {
        self.event
    }
}
