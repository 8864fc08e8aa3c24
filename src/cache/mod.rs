//! Keyed query cache with change notifications.
//!
//! This module provides the process-wide store that bindings and mutations
//! share:
//! - Entries addressed by structural [`QueryKey`]s, matched by prefix
//! - Staleness, invalidation with background refetch, removal, cancellation
//! - Subscriptions that receive a [`CacheEvent`] for every change
//! - Storage backends for the persisted user mirror

mod entry;
mod events;
mod key;
mod layer;
mod storage;

pub use entry::{CacheEntry, QueryStatus};
pub use events::{CacheEvent, KeyFilter, Subscription};
pub use key::{names, KeySegment, QueryKey};
pub use layer::{fetcher, CacheOptions, FetchFuture, Fetcher, QueryCache, QueryContext};
pub use storage::{MirrorStorage, NoopStorage, SqliteStorage};
