//! Filter construction for commit scans.
//!
//! Builders here are pure: they return a [`CommitFilter`] value describing
//! which commits a query needs, and never touch storage. Backends either
//! evaluate the filter directly ([`CommitFilter::matches`]) or translate its
//! clauses into their own query language.
//!
//! The position clause is commit-granular. A cursor in the middle of a commit
//! still selects that whole commit; the decoder drops the events already seen.

use chrono::{DateTime, Utc};

use commitlog_core::{Cursor, QuerySelector, StreamName, StreamPattern, StreamSelector};
use commitlog_events::Commit;

/// Dotted storage path of an event metadata property.
pub fn metadata_path(property: &str) -> String {
    format!("events.metadata.{property}")
}

/// One predicate over a stored commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Commit belongs to exactly this stream.
    StreamEquals(StreamName),

    /// Commit's stream name matches the pattern.
    StreamMatches(StreamPattern),

    /// At least one event of the commit has `metadata[property] == value`.
    MetadataEquals { property: String, value: String },

    /// Commit position (`timestamp`, `checkpoint`) is after the given one,
    /// or equal to it when `inclusive`.
    AfterPosition {
        timestamp: DateTime<Utc>,
        checkpoint: u64,
        inclusive: bool,
    },

    /// Commit contains an event with stream offset `>= from_offset`
    /// (`starting_offset + event_count >= from_offset`).
    EndsAtOrAfter(u64),
}

impl Clause {
    pub fn matches(&self, commit: &Commit) -> bool {
        match self {
            Self::StreamEquals(name) => commit.stream() == name,
            Self::StreamMatches(pattern) => pattern.is_match(commit.stream().as_str()),
            Self::MetadataEquals { property, value } => commit
                .events()
                .iter()
                .any(|e| e.metadata_value(property) == Some(value.as_str())),
            Self::AfterPosition {
                timestamp,
                checkpoint,
                inclusive,
            } => {
                let position = (commit.timestamp(), commit.checkpoint());
                let bound = (*timestamp, *checkpoint);
                if *inclusive {
                    position >= bound
                } else {
                    position > bound
                }
            }
            Self::EndsAtOrAfter(from_offset) => commit.ending_offset() >= *from_offset,
        }
    }
}

impl core::fmt::Display for Clause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::StreamEquals(name) => write!(f, "stream == {name:?}", name = name.as_str()),
            Self::StreamMatches(pattern) => write!(f, "stream ~ /{}/", pattern.as_str()),
            Self::MetadataEquals { property, value } => {
                write!(f, "{} == {value:?}", metadata_path(property))
            }
            Self::AfterPosition {
                timestamp,
                checkpoint,
                inclusive,
            } => {
                let op = if *inclusive { ">=" } else { ">" };
                write!(f, "(timestamp, checkpoint) {op} ({}, {checkpoint})", timestamp.to_rfc3339())
            }
            Self::EndsAtOrAfter(offset) => write!(f, "starting_offset + event_count >= {offset}"),
        }
    }
}

/// Conjunction of clauses. An empty filter matches every commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitFilter {
    clauses: Vec<Clause>,
}

impl CommitFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, commit: &Commit) -> bool {
        self.clauses.iter().all(|c| c.matches(commit))
    }
}

impl core::fmt::Display for CommitFilter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("true");
        }
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}

/// Position clause for a cursor.
///
/// A cursor at the end of its commit excludes that commit (`>`); otherwise the
/// commit still has undelivered events and is included (`>=`).
pub fn position_clause(cursor: &Cursor) -> Clause {
    Clause::AfterPosition {
        timestamp: cursor.timestamp(),
        checkpoint: cursor.checkpoint(),
        inclusive: !cursor.is_end_of_commit(),
    }
}

/// Filter for a range read of one stream from `from_offset`.
pub fn range_filter(stream: &StreamName, from_offset: u64) -> CommitFilter {
    CommitFilter::new()
        .and(Clause::StreamEquals(stream.clone()))
        .and(Clause::EndsAtOrAfter(from_offset))
}

/// Filter for a continuous read resuming after `cursor`.
pub fn continuous_filter(selector: &QuerySelector, cursor: &Cursor) -> CommitFilter {
    let filter = CommitFilter::new().and(position_clause(cursor));
    match selector {
        QuerySelector::Streams(StreamSelector::All) => filter,
        QuerySelector::Streams(StreamSelector::Exact(name)) => {
            filter.and(Clause::StreamEquals(name.clone()))
        }
        QuerySelector::Streams(StreamSelector::Pattern(pattern)) => {
            filter.and(Clause::StreamMatches(pattern.clone()))
        }
        QuerySelector::Property { name, value } => filter.and(Clause::MetadataEquals {
            property: name.clone(),
            value: value.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitlog_core::CommitId;
    use commitlog_events::Event;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn commit(stream: &str, starting_offset: u64, secs: i64, checkpoint: u64, events: Vec<Event>) -> Commit {
        Commit::new(
            CommitId::new(),
            StreamName::new(stream).unwrap(),
            starting_offset,
            ts(secs),
            checkpoint,
            events,
        )
        .unwrap()
    }

    fn one(stream: &str, secs: i64, checkpoint: u64) -> Commit {
        commit(stream, 0, secs, checkpoint, vec![Event::new("e", json!({}))])
    }

    #[test]
    fn cursor_at_end_of_commit_is_exclusive() {
        let cursor = Cursor::new(ts(100), 4, 1, 2).unwrap();
        assert_eq!(
            position_clause(&cursor),
            Clause::AfterPosition {
                timestamp: ts(100),
                checkpoint: 4,
                inclusive: false
            }
        );
    }

    #[test]
    fn cursor_mid_commit_is_inclusive() {
        let cursor = Cursor::new(ts(100), 4, 0, 2).unwrap();
        let clause = position_clause(&cursor);
        assert!(matches!(clause, Clause::AfterPosition { inclusive: true, .. }));
        assert!(clause.matches(&one("s", 100, 4)));
        assert!(!clause.matches(&one("s", 100, 3)));
    }

    #[test]
    fn beginning_cursor_matches_everything() {
        let filter = continuous_filter(&QuerySelector::all(), &Cursor::beginning());
        assert!(filter.matches(&one("a", 0, 1)));
        assert!(filter.matches(&one("b", -5_000_000_000, 1)));
    }

    #[test]
    fn match_all_selector_adds_no_stream_clause() {
        let filter = continuous_filter(&QuerySelector::streams("").unwrap(), &Cursor::beginning());
        assert_eq!(filter.clauses().len(), 1);
    }

    #[test]
    fn exact_and_pattern_selectors() {
        let exact = continuous_filter(&QuerySelector::streams("orders-1").unwrap(), &Cursor::beginning());
        assert!(exact.matches(&one("orders-1", 1, 1)));
        assert!(!exact.matches(&one("orders-2", 1, 2)));

        let pattern = continuous_filter(&QuerySelector::streams("^orders-.*").unwrap(), &Cursor::beginning());
        assert!(pattern.matches(&one("orders-1", 1, 1)));
        assert!(pattern.matches(&one("orders-2", 1, 2)));
        assert!(!pattern.matches(&one("invoices-1", 1, 3)));
    }

    #[test]
    fn property_filter_matches_any_event_in_commit() {
        let selector = QuerySelector::property("causationId", "cmd-7").unwrap();
        let filter = continuous_filter(&selector, &Cursor::beginning());

        let hit = commit(
            "s",
            0,
            1,
            1,
            vec![
                Event::new("a", json!({})),
                Event::new("b", json!({})).with_metadata("causationId", "cmd-7"),
            ],
        );
        let miss = commit(
            "s",
            2,
            2,
            2,
            vec![Event::new("c", json!({})).with_metadata("causationId", "cmd-8")],
        );
        assert!(filter.matches(&hit));
        assert!(!filter.matches(&miss));
        assert!(filter.to_string().contains("events.metadata.causationId"));
    }

    #[test]
    fn range_filter_keeps_commit_straddling_start() {
        let stream = StreamName::new("s").unwrap();
        let filter = range_filter(&stream, 5);
        let events = (0..10).map(|_| Event::new("e", json!({}))).collect();

        // One commit holding offsets 1..=10 must still be fetched for offset 5.
        assert!(filter.matches(&commit("s", 0, 1, 1, events)));
        // A commit ending at offset 4 holds nothing at or after 5.
        let early = (0..4).map(|_| Event::new("e", json!({}))).collect();
        assert!(!filter.matches(&commit("s", 0, 1, 1, early)));
        assert!(!filter.matches(&commit("t", 9, 1, 2, vec![Event::new("e", json!({}))])));
    }
}
