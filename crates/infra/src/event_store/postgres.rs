//! Postgres-backed commit log (read path).
//!
//! Commits live in one `commits` table, one row per commit, with the events
//! stored as a JSONB array. Scans translate each [`Clause`] into a SQL
//! predicate and page through results with a `(committed_at, checkpoint)`
//! keyset, so no server-side cursor outlives a page.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | StoreError | Scenario |
//! |------------|------------|----------|
//! | PoolTimedOut | `Timeout` | No connection became available in time |
//! | ColumnDecode / Decode / ColumnNotFound | `Corrupt` | Row does not match the schema |
//! | Database / Io / Tls / PoolClosed / other | `Unavailable` | Server or network failure |
//!
//! ## Thread Safety
//!
//! `PostgresCommitLog` is `Send + Sync` and cheap to clone; all operations go
//! through the SQLx connection pool.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::json;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::watch;
use tracing::{Span, debug, instrument, warn};

use commitlog_core::{CommitId, StreamName};
use commitlog_events::{Commit, Event};

use super::filter::{Clause, CommitFilter};
use super::r#trait::{CommitLog, CommitPosition, CommitStream, StoreError, paged};
use crate::config::CommitLogConfig;

/// Channel on which inserts announce their checkpoint.
pub const NOTIFY_CHANNEL: &str = "commitlog_commits";

/// Name of the GIN index serving metadata-equality filters.
pub const METADATA_INDEX: &str = "commits_events_metadata_idx";

/// Table, indexes, and the insert trigger feeding [`NOTIFY_CHANNEL`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    checkpoint      BIGSERIAL PRIMARY KEY,
    commit_id       UUID NOT NULL UNIQUE,
    stream_name     TEXT NOT NULL CHECK (stream_name <> ''),
    starting_offset BIGINT NOT NULL CHECK (starting_offset >= 0),
    event_count     INT NOT NULL CHECK (event_count > 0),
    committed_at    TIMESTAMPTZ NOT NULL,
    events          JSONB NOT NULL,
    UNIQUE (stream_name, starting_offset)
);

CREATE INDEX IF NOT EXISTS commits_position_idx ON commits (committed_at, checkpoint);

CREATE OR REPLACE FUNCTION commitlog_notify() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify('commitlog_commits', NEW.checkpoint::text);
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS commits_notify ON commits;
CREATE TRIGGER commits_notify AFTER INSERT ON commits
    FOR EACH ROW EXECUTE FUNCTION commitlog_notify();
"#;

const SELECT_COMMITS: &str = "SELECT checkpoint, commit_id, stream_name, starting_offset, \
     event_count, committed_at, events FROM commits WHERE true";

/// Postgres-backed commit log.
#[derive(Debug, Clone)]
pub struct PostgresCommitLog {
    pool: Arc<PgPool>,
}

impl PostgresCommitLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool sized from `config`. `DATABASE_URL` must be set.
    pub async fn connect(config: &CommitLogConfig) -> Result<Self, StoreError> {
        let url = config
            .require_database_url()
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Subscribe to insert notifications.
    ///
    /// A background task forwards every checkpoint announced on
    /// [`NOTIFY_CHANNEL`] until the last receiver is dropped, which closes the
    /// listener connection. If the connection fails the sender is dropped,
    /// which subscriptions treat as "fall back to polling".
    pub async fn notifier(&self) -> Result<watch::Receiver<u64>, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("listen", e))?;
        listener
            .listen(NOTIFY_CHANNEL)
            .await
            .map_err(|e| map_sqlx_error("listen", e))?;

        let (tx, rx) = watch::channel(0);
        let payloads = listener
            .into_stream()
            .map_ok(|notification| notification.payload().to_owned());
        tokio::spawn(forward_checkpoints(payloads, tx));
        Ok(rx)
    }

    #[instrument(skip(self, filter), fields(filter = %filter, row_count), err(level = "warn"))]
    async fn fetch_page(
        &self,
        filter: &CommitFilter,
        after: Option<CommitPosition>,
        limit: usize,
    ) -> Result<Vec<Commit>, StoreError> {
        let rows = page_query(filter, after, limit)
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("scan", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait::async_trait]
impl CommitLog for PostgresCommitLog {
    fn scan(&self, filter: CommitFilter, page_size: usize) -> CommitStream<'_> {
        let limit = page_size.max(1);
        let filter = Arc::new(filter);
        paged(limit, move |after| {
            let filter = filter.clone();
            async move { self.fetch_page(&filter, after, limit).await }
        })
    }

    #[instrument(skip(self), err)]
    async fn ensure_index(&self, metadata_property: &str) -> Result<(), StoreError> {
        validate_property(metadata_property)?;
        // One jsonb_path_ops index serves containment on every property.
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS {METADATA_INDEX} ON commits USING GIN (events jsonb_path_ops)"
        );
        sqlx::query(&ddl)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_index", e))?;
        debug!(property = metadata_property, "metadata index ensured");
        Ok(())
    }
}

/// Publish each checkpoint payload on `tx` until the notifications end or
/// every receiver is gone.
async fn forward_checkpoints<S, E>(notifications: S, tx: watch::Sender<u64>)
where
    S: Stream<Item = Result<String, E>>,
    E: std::fmt::Display,
{
    tokio::pin!(notifications);
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!("commit notifier has no receivers, closing listener");
                break;
            }
            next = notifications.next() => next,
        };
        match next {
            Some(Ok(payload)) => match payload.parse::<u64>() {
                Ok(checkpoint) => {
                    tx.send_replace(checkpoint);
                }
                Err(_) => {
                    warn!(payload = %payload, "ignoring malformed commit notification");
                }
            },
            Some(Err(err)) => {
                warn!(error = %err, "commit notification listener stopped");
                break;
            }
            None => break,
        }
    }
}

/// Build the SQL for one scan page.
pub(crate) fn page_query(
    filter: &CommitFilter,
    after: Option<CommitPosition>,
    limit: usize,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(SELECT_COMMITS);
    for clause in filter.clauses() {
        qb.push(" AND ");
        push_clause(&mut qb, clause);
    }
    if let Some((timestamp, checkpoint)) = after {
        qb.push(" AND ");
        push_position(&mut qb, timestamp, checkpoint, false);
    }
    qb.push(" ORDER BY committed_at, checkpoint LIMIT ")
        .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    qb
}

fn push_clause(qb: &mut QueryBuilder<'static, Postgres>, clause: &Clause) {
    match clause {
        Clause::StreamEquals(name) => {
            qb.push("stream_name = ").push_bind(name.as_str().to_owned());
        }
        Clause::StreamMatches(pattern) => {
            qb.push("stream_name ~ ").push_bind(pattern.as_str().to_owned());
        }
        Clause::MetadataEquals { property, value } => {
            qb.push("events @> ")
                .push_bind(metadata_containment(property, value));
        }
        Clause::AfterPosition {
            timestamp,
            checkpoint,
            inclusive,
        } => push_position(qb, *timestamp, *checkpoint, *inclusive),
        Clause::EndsAtOrAfter(offset) => {
            qb.push("starting_offset + event_count >= ")
                .push_bind(i64::try_from(*offset).unwrap_or(i64::MAX));
        }
    }
}

/// `[{"metadata": {property: value}}]`, matched with JSONB containment.
fn metadata_containment(property: &str, value: &str) -> serde_json::Value {
    let mut metadata = serde_json::Map::new();
    metadata.insert(property.to_owned(), json!(value));
    json!([{ "metadata": metadata }])
}

fn push_position(
    qb: &mut QueryBuilder<'static, Postgres>,
    timestamp: DateTime<Utc>,
    checkpoint: u64,
    inclusive: bool,
) {
    // TIMESTAMPTZ starts at 4713 BC; anything earlier is the log's beginning.
    if timestamp.year() < -4712 {
        qb.push("true");
        return;
    }
    qb.push("(committed_at, checkpoint) ")
        .push(if inclusive { ">= (" } else { "> (" })
        .push_bind(timestamp)
        .push(", ")
        .push_bind(i64::try_from(checkpoint).unwrap_or(i64::MAX))
        .push(")");
}

fn validate_property(property: &str) -> Result<(), StoreError> {
    let valid = !property.is_empty()
        && property
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!(
            "metadata property {property:?} must be non-empty ASCII alphanumerics, '_' or '-'"
        )))
    }
}

fn decode_row(row: &PgRow) -> Result<Commit, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(format!("failed to read commit row: {e}"));

    let checkpoint: i64 = row.try_get("checkpoint").map_err(corrupt)?;
    let commit_id: uuid::Uuid = row.try_get("commit_id").map_err(corrupt)?;
    let stream_name: String = row.try_get("stream_name").map_err(corrupt)?;
    let starting_offset: i64 = row.try_get("starting_offset").map_err(corrupt)?;
    let event_count: i32 = row.try_get("event_count").map_err(corrupt)?;
    let committed_at: DateTime<Utc> = row.try_get("committed_at").map_err(corrupt)?;
    let events: serde_json::Value = row.try_get("events").map_err(corrupt)?;

    let corrupt = |msg: String| StoreError::Corrupt(format!("commit {commit_id} (checkpoint {checkpoint}): {msg}"));

    let events: Vec<Event> = serde_json::from_value(events).map_err(|e| corrupt(e.to_string()))?;
    if i64::from(event_count) != events.len() as i64 {
        return Err(corrupt(format!(
            "event_count is {event_count} but {} events are stored",
            events.len()
        )));
    }
    let checkpoint = u64::try_from(checkpoint).map_err(|e| corrupt(e.to_string()))?;
    let starting_offset = u64::try_from(starting_offset).map_err(|e| corrupt(e.to_string()))?;
    let stream = StreamName::new(stream_name).map_err(|e| corrupt(e.to_string()))?;

    Commit::new(
        CommitId::from_uuid(commit_id),
        stream,
        starting_offset,
        committed_at,
        checkpoint,
        events,
    )
    .map_err(|e| corrupt(e.to_string()))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("undecodable row in {operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            StoreError::Unavailable(format!(
                "database error in {operation} [{code}]: {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
