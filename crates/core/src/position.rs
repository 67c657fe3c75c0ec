//! Resumable read positions and their opaque token encoding.
//!
//! A [`Cursor`] names the last event a consumer has seen:
//!
//! - `timestamp` and `checkpoint` identify the commit (commits are ordered by
//!   timestamp first, checkpoint second; several commits may share a timestamp
//!   at storage resolution)
//! - `commit_offset` is the 0-based index of the event inside that commit
//!   (`-1` means "none of it yet")
//! - `commit_size` is the commit's event count
//!
//! Tokens are 48 lower-case hex characters. Their lexicographic order is the
//! cursor order, so persisted tokens can be compared without decoding.

use core::cmp::Ordering;
use core::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

const TOKEN_BYTES: usize = 24;
const SIGN_FLIP: u64 = 1 << 63;

/// Truncate a timestamp to the resolution positions are stored at (microseconds).
pub fn storage_resolution(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Position of the last delivered event.
///
/// Created by the query engines for every event they emit. Opaque to callers
/// apart from ordering and equality.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    timestamp: DateTime<Utc>,
    checkpoint: u64,
    commit_offset: i32,
    commit_size: u32,
}

impl Cursor {
    /// The "beginning of time" cursor. Everything in the log lies after it.
    pub fn beginning() -> Self {
        Self {
            timestamp: DateTime::<Utc>::MIN_UTC,
            checkpoint: 0,
            commit_offset: -1,
            commit_size: 0,
        }
    }

    /// Build a cursor from its parts.
    ///
    /// `commit_offset` must lie in `-1..commit_size`.
    pub fn new(
        timestamp: DateTime<Utc>,
        checkpoint: u64,
        commit_offset: i32,
        commit_size: u32,
    ) -> CoreResult<Self> {
        if commit_offset < -1 || i64::from(commit_offset) + 1 > i64::from(commit_size) {
            return Err(CoreError::invalid_position(format!(
                "commit offset {commit_offset} out of range for commit size {commit_size}"
            )));
        }
        Ok(Self {
            timestamp: storage_resolution(timestamp),
            checkpoint,
            commit_offset,
            commit_size,
        })
    }

    /// Cursor for the event at `index` of the commit at (`timestamp`, `checkpoint`).
    pub fn for_event(timestamp: DateTime<Utc>, checkpoint: u64, index: u32, commit_size: u32) -> Self {
        debug_assert!(index < commit_size, "event index outside its commit");
        Self {
            timestamp: storage_resolution(timestamp),
            checkpoint,
            commit_offset: index as i32,
            commit_size,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn commit_offset(&self) -> i32 {
        self.commit_offset
    }

    pub fn commit_size(&self) -> u32 {
        self.commit_size
    }

    pub fn is_beginning(&self) -> bool {
        *self == Self::beginning()
    }

    /// True when every event of the cursor's commit has been delivered.
    pub fn is_end_of_commit(&self) -> bool {
        i64::from(self.commit_offset) + 1 == i64::from(self.commit_size)
    }

    /// Order of the commit at (`timestamp`, `checkpoint`) relative to this cursor's commit.
    pub fn compare_commit(&self, timestamp: DateTime<Utc>, checkpoint: u64) -> Ordering {
        (storage_resolution(timestamp), checkpoint).cmp(&(self.timestamp, self.checkpoint))
    }

    /// Whether the event at `index` of the given commit lies strictly after this cursor.
    pub fn precedes(&self, timestamp: DateTime<Utc>, checkpoint: u64, index: u32) -> bool {
        match self.compare_commit(timestamp, checkpoint) {
            Ordering::Greater => true,
            Ordering::Equal => i64::from(index) > i64::from(self.commit_offset),
            Ordering::Less => false,
        }
    }

    /// Encode as an opaque, order-preserving token.
    pub fn encode(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        let micros = (self.timestamp.timestamp_micros() as u64) ^ SIGN_FLIP;
        bytes[0..8].copy_from_slice(&micros.to_be_bytes());
        bytes[8..16].copy_from_slice(&self.checkpoint.to_be_bytes());
        // -1 maps to 0 so the byte order follows the signed order.
        bytes[16..20].copy_from_slice(&((self.commit_offset + 1) as u32).to_be_bytes());
        bytes[20..24].copy_from_slice(&self.commit_size.to_be_bytes());
        hex::encode(bytes)
    }

    /// Decode a token. An absent or blank token is the beginning of time.
    pub fn decode(token: Option<&str>) -> CoreResult<Self> {
        let token = match token.map(str::trim) {
            None | Some("") => return Ok(Self::beginning()),
            Some(t) => t,
        };

        if token.len() != TOKEN_BYTES * 2 {
            return Err(CoreError::invalid_position(format!(
                "expected {} characters, got {}",
                TOKEN_BYTES * 2,
                token.len()
            )));
        }

        let mut bytes = [0u8; TOKEN_BYTES];
        hex::decode_to_slice(token, &mut bytes)
            .map_err(|e| CoreError::invalid_position(format!("malformed token: {e}")))?;

        let micros = (u64::from_be_bytes(word::<8>(&bytes, 0)) ^ SIGN_FLIP) as i64;
        let checkpoint = u64::from_be_bytes(word::<8>(&bytes, 8));
        let shifted_offset = u32::from_be_bytes(word::<4>(&bytes, 16));
        let commit_size = u32::from_be_bytes(word::<4>(&bytes, 20));

        let timestamp = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| CoreError::invalid_position(format!("timestamp out of range: {micros}")))?;
        let commit_offset = i32::try_from(i64::from(shifted_offset) - 1)
            .map_err(|_| CoreError::invalid_position("commit offset out of range"))?;

        Self::new(timestamp, checkpoint, commit_offset, commit_size)
    }
}

fn word<const N: usize>(bytes: &[u8; TOKEN_BYTES], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

impl Default for Cursor {
    fn default() -> Self {
        Self::beginning()
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, self.checkpoint, self.commit_offset, self.commit_size).cmp(&(
            other.timestamp,
            other.checkpoint,
            other.commit_offset,
            other.commit_size,
        ))
    }
}

impl core::fmt::Display for Cursor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(Some(s))
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::decode(Some(&token)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn absent_or_blank_token_is_beginning() {
        assert_eq!(Cursor::decode(None).unwrap(), Cursor::beginning());
        assert_eq!(Cursor::decode(Some("")).unwrap(), Cursor::beginning());
        assert_eq!(Cursor::decode(Some("   ")).unwrap(), Cursor::beginning());
    }

    #[test]
    fn beginning_survives_encoding() {
        let token = Cursor::beginning().encode();
        assert_eq!(token.len(), 48);
        assert!(Cursor::decode(Some(&token)).unwrap().is_beginning());
    }

    #[test]
    fn beginning_is_end_of_commit() {
        // Nothing of the "empty commit" before time is pending.
        assert!(Cursor::beginning().is_end_of_commit());
    }

    #[test]
    fn malformed_tokens_are_invalid_positions() {
        for bad in ["xyz", "00", &"g".repeat(48), &"0".repeat(47)] {
            assert!(
                matches!(Cursor::decode(Some(bad)), Err(CoreError::InvalidPosition(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn offset_beyond_size_is_rejected() {
        let cursor = Cursor::for_event(ts(100), 1, 1, 2);
        let mut token = cursor.encode();
        // Rewrite commit_size to 1 while commit_offset stays 1.
        token.replace_range(40..48, "00000001");
        assert!(matches!(
            Cursor::decode(Some(&token)),
            Err(CoreError::InvalidPosition(_))
        ));
    }

    #[test]
    fn out_of_range_timestamp_is_rejected() {
        // i64::MAX microseconds once the sign bit is flipped back.
        let token = format!("{}{}", "f".repeat(16), "0".repeat(32));
        match Cursor::decode(Some(&token)) {
            Err(CoreError::InvalidPosition(msg)) => assert!(msg.contains("timestamp out of range")),
            other => panic!("expected InvalidPosition, got {other:?}"),
        }
    }

    #[test]
    fn sub_microsecond_precision_is_dropped() {
        let precise = DateTime::<Utc>::from_timestamp(100, 1_234_567).unwrap();
        let cursor = Cursor::for_event(precise, 3, 0, 1);
        assert_eq!(cursor.timestamp().timestamp_subsec_nanos(), 1_234_000);
        assert_eq!(cursor.encode().parse::<Cursor>().unwrap(), cursor);
    }

    #[test]
    fn precedes_uses_intra_commit_index_on_equal_commit() {
        let c = Cursor::for_event(ts(100), 7, 0, 3);
        assert!(!c.precedes(ts(100), 7, 0));
        assert!(c.precedes(ts(100), 7, 1));
        assert!(c.precedes(ts(100), 8, 0));
        assert!(!c.precedes(ts(100), 6, 2));
        assert!(c.precedes(ts(101), 1, 0));
        assert!(!c.precedes(ts(99), 100, 0));
    }

    #[test]
    fn serde_uses_token() {
        let c = Cursor::for_event(ts(100), 2, 1, 2);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"{}\"", c.encode()));
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    fn arb_cursor() -> impl Strategy<Value = Cursor> {
        (-4_000_000_000i64..4_000_000_000i64, 0u64..1_000, 1u32..50)
            .prop_flat_map(|(secs, checkpoint, size)| {
                (Just(secs), Just(checkpoint), -1i32..size as i32, Just(size))
            })
            .prop_map(|(secs, checkpoint, offset, size)| {
                Cursor::new(ts(secs), checkpoint, offset, size).unwrap()
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: token order is cursor order, and decoding inverts encoding.
        #[test]
        fn token_order_matches_cursor_order(a in arb_cursor(), b in arb_cursor()) {
            let (ta, tb) = (a.encode(), b.encode());
            prop_assert_eq!(ta.cmp(&tb), a.cmp(&b));
            prop_assert_eq!(Cursor::decode(Some(&ta)).unwrap(), a);
        }
    }
}
