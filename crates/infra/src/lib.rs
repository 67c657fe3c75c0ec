//! Infrastructure layer: commit log storage, query engines, subscriptions.

pub mod config;
pub mod event_store;
pub mod subscription;


pub use config::{CommitLogConfig, ConfigError};
pub use event_store::{
    CommitLog, ContinuousQuery, InMemoryCommitLog, PostgresCommitLog, QueryError, RangeQuery,
    ScanOutcome, StoreError,
};
pub use subscription::{CommitNotifier, Subscriber, Subscription, SubscriptionConfig, SubscriptionHandle};
