//! Query bindings: a consumer's view of one cache entry.
//!
//! A `Query<T>` ties a consumer to a key in the shared [`QueryCache`]. It
//! registers the fetch function for the key, triggers a fetch when the data is
//! missing or stale, and exposes a typed [`QuerySnapshot`] with the usual
//! loading/error/success flags.
//!
//! # Example
//!
//! ```ignore
//! let api = blog.clone();
//! let mut posts = Query::new(
//!     &cache,
//!     query_key!["posts", 1],
//!     move |ctx| {
//!         let api = api.clone();
//!         let page = ctx.key.int_at(1).unwrap_or(1) as u32;
//!         async move { api.fetch_posts(page).await.map_err(ErrorInfo::from) }
//!     },
//!     QueryOptions::default().keep_previous_data(true),
//! );
//!
//! // In the event loop
//! if posts.poll() {
//!     render(posts.snapshot());
//! }
//!
//! // Page change: page 1 stays visible until page 2 arrives
//! posts.set_key(query_key!["posts", 2]);
//! ```

mod infinite;

pub use infinite::{InfiniteData, InfiniteQuery, InfiniteSnapshot};

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::{fetcher, Fetcher, KeyFilter, QueryCache, QueryContext, QueryKey, QueryStatus, Subscription};
use crate::error::ErrorInfo;

/// Per-binding configuration.
#[derive(Debug, Clone)]
pub struct QueryOptions<T> {
  /// Freshness window; the cache default when `None`
  pub stale_time: Option<Duration>,
  /// Disabled bindings never fetch and report `Idle` until data exists
  pub enabled: bool,
  /// Show the previous key's data while a new key loads
  pub keep_previous_data: bool,
  /// Seed for an empty entry, counted as fresh when written
  pub initial_data: Option<T>,
}

impl<T> Default for QueryOptions<T> {
  fn default() -> Self {
    Self {
      stale_time: None,
      enabled: true,
      keep_previous_data: false,
      initial_data: None,
    }
  }
}

impl<T> QueryOptions<T> {
  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn keep_previous_data(mut self, keep: bool) -> Self {
    self.keep_previous_data = keep;
    self
  }

  pub fn initial_data(mut self, data: T) -> Self {
    self.initial_data = Some(data);
    self
  }
}

/// What a consumer renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T> {
  pub data: Option<T>,
  pub status: QueryStatus,
  /// No data has been produced for the key yet and a fetch is running
  pub is_loading: bool,
  /// A network call is outstanding, background refetches included
  pub is_fetching: bool,
  pub is_error: bool,
  pub is_success: bool,
  /// `data` belongs to the previous key
  pub is_previous_data: bool,
  pub error: Option<ErrorInfo>,
}

impl<T> QuerySnapshot<T> {
  fn idle() -> Self {
    Self {
      data: None,
      status: QueryStatus::Idle,
      is_loading: false,
      is_fetching: false,
      is_error: false,
      is_success: false,
      is_previous_data: false,
      error: None,
    }
  }
}

/// Binding of one consumer to a keyed cache entry.
pub struct Query<T> {
  cache: QueryCache,
  key: QueryKey,
  fetcher: Fetcher,
  stale_time: Duration,
  enabled: bool,
  keep_previous_data: bool,
  /// Previous key's data, shown while the current key has none
  placeholder: Option<Value>,
  initial: Option<Value>,
  subscription: Subscription,
  _data: PhantomData<fn() -> T>,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Bind to `key`, fetching immediately when enabled and the entry is
  /// missing or stale.
  ///
  /// The fetch function receives the key being fetched, so one function can
  /// serve every key a binding moves through.
  pub fn new<F, Fut>(cache: &QueryCache, key: QueryKey, fetch: F, options: QueryOptions<T>) -> Self
  where
    F: Fn(QueryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ErrorInfo>> + Send + 'static,
  {
    let initial = options
      .initial_data
      .and_then(|data| serde_json::to_value(data).ok());

    let mut query = Self {
      subscription: cache.subscribe(KeyFilter::Exact(key.clone())),
      cache: cache.clone(),
      key,
      fetcher: fetcher(fetch),
      stale_time: options.stale_time.unwrap_or(cache.options().stale_time),
      enabled: options.enabled,
      keep_previous_data: options.keep_previous_data,
      placeholder: None,
      initial,
      _data: PhantomData,
    };
    if query.enabled {
      query.mount();
    }
    query
  }

  fn mount(&mut self) {
    self.cache.observe(
      &self.key,
      self.fetcher.clone(),
      self.stale_time,
      self.initial.take(),
    );
    self.cache.ensure_fresh(&self.key, self.stale_time);
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Enable or disable fetching. Only a disabled-to-enabled transition can
  /// start a fetch, and never while one is already running for the key.
  pub fn set_enabled(&mut self, enabled: bool) {
    if enabled == self.enabled {
      return;
    }
    self.enabled = enabled;
    if enabled {
      debug!(key = %self.key, "query enabled");
      self.mount();
    } else {
      debug!(key = %self.key, "query disabled");
      self.cache.unobserve(&self.key, false);
    }
  }

  /// Move the binding to another key.
  pub fn set_key(&mut self, key: QueryKey) {
    if key == self.key {
      return;
    }

    self.placeholder = if self.keep_previous_data {
      self
        .cache
        .get(&self.key)
        .and_then(|entry| entry.data)
        .or_else(|| self.placeholder.take())
    } else {
      None
    };

    if self.enabled {
      // Any fetch for the old key keeps running and lands in the cache
      self.cache.unobserve(&self.key, false);
    }
    debug!(from = %self.key, to = %key, "query key changed");
    self.key = key;
    self.subscription = self.cache.subscribe(KeyFilter::Exact(self.key.clone()));
    if self.enabled {
      self.mount();
    }
  }

  /// Fetch again regardless of freshness. Ignored while disabled.
  pub fn refetch(&self) -> bool {
    self.enabled && self.cache.refetch(&self.key)
  }

  /// Drain pending change notifications. Returns whether anything changed.
  pub fn poll(&mut self) -> bool {
    !self.subscription.drain().is_empty()
  }

  /// Wait until no fetch is outstanding for the bound key.
  pub async fn settled(&self) {
    self.cache.settled(&self.key).await;
  }

  pub fn data(&self) -> Option<T> {
    self.snapshot().data
  }

  /// Current view of the bound entry.
  pub fn snapshot(&self) -> QuerySnapshot<T> {
    let Some(entry) = self.cache.get(&self.key) else {
      return self.placeholder_snapshot(false).unwrap_or_else(QuerySnapshot::idle);
    };

    if entry.data.is_none() && entry.status != QueryStatus::Error {
      if let Some(snapshot) = self.placeholder_snapshot(entry.is_fetching) {
        return snapshot;
      }
    }

    let data = entry.data_as::<T>();
    QuerySnapshot {
      is_loading: entry.status == QueryStatus::Loading,
      is_fetching: entry.is_fetching,
      is_error: entry.status == QueryStatus::Error,
      is_success: entry.status == QueryStatus::Success,
      is_previous_data: false,
      status: entry.status,
      error: entry.error,
      data,
    }
  }

  fn placeholder_snapshot(&self, is_fetching: bool) -> Option<QuerySnapshot<T>> {
    let data = self
      .placeholder
      .clone()
      .and_then(|value| serde_json::from_value(value).ok())?;
    Some(QuerySnapshot {
      data: Some(data),
      status: QueryStatus::Success,
      is_fetching,
      is_success: true,
      is_previous_data: true,
      ..QuerySnapshot::idle()
    })
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if self.enabled {
      self.cache.unobserve(&self.key, true);
    }
  }
}

impl<T> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("enabled", &self.enabled)
      .field("stale_time", &self.stale_time)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use tokio::sync::Notify;

  fn counting_fetch(
    calls: Arc<AtomicU32>,
  ) -> impl Fn(QueryContext) -> futures::future::BoxFuture<'static, Result<Vec<i64>, ErrorInfo>>
       + Send
       + Sync
       + 'static {
    use futures::FutureExt;
    move |ctx: QueryContext| {
      calls.fetch_add(1, Ordering::SeqCst);
      let page = ctx.key.int_at(1).unwrap_or(0);
      async move { Ok(vec![page]) }.boxed()
    }
  }

  #[tokio::test]
  async fn test_query_success() {
    let cache = QueryCache::default();
    let mut query = Query::new(
      &cache,
      query_key!["numbers"],
      |_| async { Ok::<_, ErrorInfo>(vec![1, 2, 3]) },
      QueryOptions::default(),
    );

    let snapshot = query.snapshot();
    assert!(snapshot.is_loading);
    assert!(snapshot.is_fetching);

    query.settled().await;
    assert!(query.poll());

    let snapshot = query.snapshot();
    assert!(snapshot.is_success);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.data, Some(vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let cache = QueryCache::default();
    let query: Query<i32> = Query::new(
      &cache,
      query_key!["broken"],
      |_| async { Err(ErrorInfo::transport("Something went wrong")) },
      QueryOptions::default(),
    );

    query.settled().await;
    let snapshot = query.snapshot();
    assert!(snapshot.is_error);
    assert_eq!(snapshot.status, QueryStatus::Error);
    assert_eq!(snapshot.error.unwrap().message, "Something went wrong");
  }

  #[tokio::test]
  async fn test_fresh_entry_is_not_refetched() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));

    let first = Query::new(
      &cache,
      query_key!["page", 1],
      counting_fetch(calls.clone()),
      QueryOptions::default(),
    );
    first.settled().await;

    let second = Query::new(
      &cache,
      query_key!["page", 1],
      counting_fetch(calls.clone()),
      QueryOptions::default(),
    );
    assert_eq!(second.data(), Some(vec![1]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_disabled_query_stays_idle() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let query = Query::new(
      &cache,
      query_key!["page", 1],
      counting_fetch(calls.clone()),
      QueryOptions::default().enabled(false),
    );

    tokio::task::yield_now().await;
    let snapshot = query.snapshot();
    assert_eq!(snapshot.status, QueryStatus::Idle);
    assert!(!snapshot.is_loading);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_enabling_repeatedly_fetches_once() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = Query::new(
      &cache,
      query_key!["page", 1],
      counting_fetch(calls.clone()),
      QueryOptions::default().enabled(false),
    );

    query.set_enabled(true);
    query.set_enabled(true);
    query.set_enabled(false);
    query.set_enabled(true);
    query.settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(query.data(), Some(vec![1]));
  }

  #[tokio::test]
  async fn test_keep_previous_data_across_key_change() {
    let cache = QueryCache::default();
    let gate = Arc::new(Notify::new());
    let release = gate.clone();

    let mut query = Query::new(
      &cache,
      query_key!["posts", 1],
      move |ctx: QueryContext| {
        let gate = gate.clone();
        let page = ctx.key.int_at(1).unwrap_or(0);
        async move {
          if page > 1 {
            gate.notified().await;
          }
          Ok::<_, ErrorInfo>(vec![page])
        }
      },
      QueryOptions::default().keep_previous_data(true),
    );
    query.settled().await;
    assert_eq!(query.data(), Some(vec![1]));

    query.set_key(query_key!["posts", 2]);
    let snapshot = query.snapshot();
    assert_eq!(snapshot.data, Some(vec![1]));
    assert!(snapshot.is_previous_data);
    assert!(snapshot.is_fetching);
    assert!(!snapshot.is_loading);

    release.notify_one();
    query.settled().await;
    let snapshot = query.snapshot();
    assert_eq!(snapshot.data, Some(vec![2]));
    assert!(!snapshot.is_previous_data);
  }

  #[tokio::test]
  async fn test_key_change_without_keep_previous_shows_loading() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = Query::new(
      &cache,
      query_key!["page", 1],
      counting_fetch(calls.clone()),
      QueryOptions::default(),
    );
    query.settled().await;

    query.set_key(query_key!["page", 2]);
    assert!(query.snapshot().is_loading);
    assert_eq!(query.snapshot().data, None);
  }

  #[tokio::test]
  async fn test_initial_data_counts_as_fresh() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let query = Query::new(
      &cache,
      query_key!["page", 7],
      counting_fetch(calls.clone()),
      QueryOptions::default().initial_data(vec![42]),
    );

    assert_eq!(query.data(), Some(vec![42]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_drop_cancels_pending_fetch() {
    let cache = QueryCache::default();
    let key = query_key!["slow"];
    let query = Query::new(
      &cache,
      key.clone(),
      |_| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<_, ErrorInfo>(1)
      },
      QueryOptions::default(),
    );
    assert_eq!(cache.is_fetching(&key), 1);

    drop(query);
    assert_eq!(cache.is_fetching(&key), 0);
    assert_eq!(cache.get(&key).unwrap().status, QueryStatus::Idle);
  }

  #[tokio::test]
  async fn test_invalidation_refetches_in_background() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let query = Query::new(
      &cache,
      query_key!["page", 3],
      counting_fetch(calls.clone()),
      QueryOptions::default(),
    );
    query.settled().await;

    cache.invalidate(&query_key!["page"]);
    let snapshot = query.snapshot();
    assert!(snapshot.is_fetching);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.data, Some(vec![3]));

    query.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
