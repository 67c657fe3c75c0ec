//! Stored events, commits, and commit decoding.

pub mod commit;
pub mod decode;
pub mod event;
pub mod stored;

pub use commit::{Commit, MAX_COMMIT_EVENTS};
pub use decode::{CommitDecoder, decode_after, decode_range};
pub use event::Event;
pub use stored::StoredEvent;
