//! Commit decoding: expanding a stored commit into positioned events.
//!
//! Every candidate gets its absolute stream offset from a running counter that
//! starts at the commit's `starting_offset`, and a cursor
//! `{commit.timestamp, commit.checkpoint, index, commit.event_count}`.
//! Which candidates are accepted depends on the read mode:
//!
//! - range reads keep events with `offset >= from_offset`
//! - continuous reads keep events strictly after a cursor, which is where
//!   already-seen events of a partially delivered commit are dropped

use commitlog_core::Cursor;

use crate::commit::Commit;
use crate::stored::StoredEvent;

#[derive(Debug, Clone, Copy)]
enum Accept {
    FromOffset(u64),
    After(Cursor),
}

/// Lazy iterator over the accepted events of one commit, in commit order.
#[derive(Debug, Clone)]
pub struct CommitDecoder<'a> {
    commit: &'a Commit,
    index: u32,
    offset: u64,
    accept: Accept,
}

impl<'a> CommitDecoder<'a> {
    /// Decoder for range reads: events with stream offset `>= from_offset`.
    pub fn from_offset(commit: &'a Commit, from_offset: u64) -> Self {
        Self::with(commit, Accept::FromOffset(from_offset))
    }

    /// Decoder for continuous reads: events positioned strictly after `cursor`.
    pub fn after(commit: &'a Commit, cursor: Cursor) -> Self {
        Self::with(commit, Accept::After(cursor))
    }

    fn with(commit: &'a Commit, accept: Accept) -> Self {
        Self {
            commit,
            index: 0,
            offset: commit.starting_offset(),
            accept,
        }
    }

    fn accepts(&self, index: u32, offset: u64) -> bool {
        match self.accept {
            Accept::FromOffset(from) => offset >= from,
            Accept::After(cursor) => {
                cursor.precedes(self.commit.timestamp(), self.commit.checkpoint(), index)
            }
        }
    }
}

impl Iterator for CommitDecoder<'_> {
    type Item = StoredEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let size = self.commit.event_count();
        while self.index < size {
            let index = self.index;
            self.index += 1;
            self.offset += 1;

            if !self.accepts(index, self.offset) {
                continue;
            }

            let cursor = Cursor::for_event(
                self.commit.timestamp(),
                self.commit.checkpoint(),
                index,
                size,
            );
            return Some(StoredEvent::new(
                cursor,
                self.commit.stream().clone(),
                self.offset,
                self.commit.events()[index as usize].clone(),
            ));
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some((self.commit.event_count() - self.index) as usize))
    }
}

/// Accepted events of `commit` for a range read starting at `from_offset`.
pub fn decode_range(commit: &Commit, from_offset: u64) -> Vec<StoredEvent> {
    CommitDecoder::from_offset(commit, from_offset).collect()
}

/// Accepted events of `commit` for a continuous read resuming after `cursor`.
pub fn decode_after(commit: &Commit, cursor: Cursor) -> Vec<StoredEvent> {
    CommitDecoder::after(commit, cursor).collect()
}
