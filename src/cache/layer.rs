//! Query cache that owns every keyed entry and orchestrates fetching.
//!
//! All state sits behind one mutex that is never held across an `.await`,
//! so each operation below is atomic with respect to every other cache
//! operation. Network calls run as tokio tasks; each carries a fetch id and
//! its result is applied only while it is still the entry's current fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::entry::{CacheEntry, QueryStatus};
use super::events::{self, CacheEvent, KeyFilter, SharedListeners, Subscription};
use super::key::QueryKey;
use crate::error::ErrorInfo;
use crate::notify::{LogNotifier, Notifier, Toast};

/// Boxed future produced by a [`Fetcher`].
pub type FetchFuture = BoxFuture<'static, Result<Value, ErrorInfo>>;

/// Type-erased fetch function registered for a key.
pub type Fetcher = Arc<dyn Fn(QueryContext) -> FetchFuture + Send + Sync>;

/// What a fetch function gets to work with.
#[derive(Debug, Clone)]
pub struct QueryContext {
  pub key: QueryKey,
  /// Data held by the entry when the fetch started
  pub data: Option<Value>,
}

impl QueryContext {
  pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
    self
      .data
      .clone()
      .and_then(|value| serde_json::from_value(value).ok())
  }
}

/// Wrap a typed fetch function into a [`Fetcher`].
pub fn fetcher<T, F, Fut>(fetch: F) -> Fetcher
where
  T: Serialize + Send + 'static,
  F: Fn(QueryContext) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, ErrorInfo>> + Send + 'static,
{
  Arc::new(move |ctx| {
    let pending = fetch(ctx);
    async move {
      let data = pending.await?;
      serde_json::to_value(data).map_err(ErrorInfo::from)
    }
    .boxed()
  })
}

/// Defaults applied to every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
  /// How long data stays fresh
  pub stale_time: Duration,
  /// How long an unobserved entry is kept before garbage collection
  pub cache_time: Duration,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(10 * 60),
      cache_time: Duration::from_secs(15 * 60),
    }
  }
}

type FetchOutcome = Option<Result<Value, ErrorInfo>>;

struct InFlight {
  id: u64,
  abort: AbortHandle,
  done: watch::Receiver<FetchOutcome>,
}

struct Slot {
  entry: CacheEntry,
  fetcher: Option<Fetcher>,
  in_flight: Option<InFlight>,
  observers: usize,
  unobserved_since: DateTime<Utc>,
}

impl Slot {
  fn new(key: QueryKey, stale_time: Duration) -> Self {
    Self {
      entry: CacheEntry::new(key, stale_time),
      fetcher: None,
      in_flight: None,
      observers: 0,
      unobserved_since: Utc::now(),
    }
  }

  /// Abort the outstanding fetch, if any. Returns whether one was running.
  fn abort_fetch(&mut self) -> bool {
    let Some(in_flight) = self.in_flight.take() else {
      return false;
    };
    in_flight.abort.abort();
    self.entry.is_fetching = false;
    if self.entry.data.is_none() && self.entry.status == QueryStatus::Loading {
      self.entry.status = QueryStatus::Idle;
    }
    true
  }

  fn future(&self) -> Option<FetchFuture> {
    self.fetcher.as_ref().map(|fetch| {
      fetch(QueryContext {
        key: self.entry.key.clone(),
        data: self.entry.data.clone(),
      })
    })
  }
}

#[derive(Default)]
struct CacheState {
  slots: HashMap<QueryKey, Slot>,
  next_fetch_id: u64,
}

impl CacheState {
  fn slot_mut(&mut self, key: &QueryKey, stale_time: Duration) -> &mut Slot {
    self
      .slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(key.clone(), stale_time))
  }

  fn matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
    self
      .slots
      .keys()
      .filter(|key| key.starts_with(prefix))
      .cloned()
      .collect()
  }

  /// Drop the entry, or reset it to empty if a consumer still observes it.
  fn remove_or_reset(&mut self, key: &QueryKey) -> bool {
    let Some(slot) = self.slots.get_mut(key) else {
      return false;
    };
    slot.abort_fetch();
    if slot.observers > 0 {
      slot.entry = CacheEntry::new(key.clone(), slot.entry.stale_time);
    } else {
      self.slots.remove(key);
    }
    true
  }
}

/// Process-wide keyed store for query results.
///
/// Construct one per application (or per test) and pass clones around;
/// every clone shares the same entries and subscribers.
#[derive(Clone)]
pub struct QueryCache {
  state: Arc<Mutex<CacheState>>,
  listeners: SharedListeners,
  options: CacheOptions,
  notifier: Arc<dyn Notifier>,
}

impl QueryCache {
  /// Create an empty cache with the given defaults, logging notifications.
  pub fn new(options: CacheOptions) -> Self {
    Self {
      state: Arc::default(),
      listeners: Arc::default(),
      options,
      notifier: Arc::new(LogNotifier),
    }
  }

  /// Route notifications raised by failed queries and mutations.
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn options(&self) -> CacheOptions {
    self.options
  }

  pub fn notifier(&self) -> &dyn Notifier {
    self.notifier.as_ref()
  }

  fn lock(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, events: Vec<CacheEvent>) {
    events::dispatch(&self.listeners, events);
  }

  // ---------------------------------------------------------------------------
  // Reads
  // ---------------------------------------------------------------------------

  /// Snapshot of the entry for `key`.
  pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.lock().slots.get(key).map(|slot| slot.entry.clone())
  }

  /// Decoded data for `key`. A miss and undecodable data both yield `None`.
  pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
    self.get(key).and_then(|entry| entry.data_as())
  }

  /// Number of outstanding fetches for keys under `prefix`.
  pub fn is_fetching(&self, prefix: &QueryKey) -> usize {
    self
      .lock()
      .slots
      .values()
      .filter(|slot| slot.in_flight.is_some() && slot.entry.key.starts_with(prefix))
      .count()
  }

  // ---------------------------------------------------------------------------
  // Writes
  // ---------------------------------------------------------------------------

  /// Replace the data for `key` and mark it successful and fresh.
  pub fn set(&self, key: &QueryKey, data: Value) {
    {
      let mut state = self.lock();
      state.slot_mut(key, self.options.stale_time).entry.write(data.clone());
    }
    debug!(key = %key, "cache data set");
    self.emit(vec![CacheEvent::Updated {
      key: key.clone(),
      data: Some(data),
    }]);
  }

  /// Serialize `data` and [`set`](Self::set) it.
  pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, data: &T) -> Result<(), ErrorInfo> {
    let value = serde_json::to_value(data)?;
    self.set(key, value);
    Ok(())
  }

  /// Mark every entry under `prefix` stale and refetch the observed ones.
  ///
  /// A refetch supersedes a fetch already in flight for the same key.
  /// Returns the number of entries invalidated.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let mut events = Vec::new();
    let count = {
      let mut state = self.lock();
      let keys = state.matching(prefix);
      for key in &keys {
        let Some(slot) = state.slots.get_mut(key) else {
          continue;
        };
        slot.entry.is_invalidated = true;
        events.push(CacheEvent::Invalidated { key: key.clone() });

        if slot.observers == 0 {
          continue;
        }
        if let Some(future) = slot.future() {
          events.push(self.launch(&mut state, key, future));
        }
      }
      keys.len()
    };
    debug!(prefix = %prefix, count, "invalidated queries");
    self.emit(events);
    count
  }

  /// Delete every entry under `prefix`. Observed entries are reset to empty
  /// rather than dropped so their bindings keep working.
  pub fn remove(&self, prefix: &QueryKey) -> usize {
    let events: Vec<CacheEvent> = {
      let mut state = self.lock();
      state
        .matching(prefix)
        .into_iter()
        .filter(|key| state.remove_or_reset(key))
        .map(|key| CacheEvent::Removed { key })
        .collect()
    };
    debug!(prefix = %prefix, count = events.len(), "removed queries");
    let count = events.len();
    self.emit(events);
    count
  }

  /// Abort outstanding fetches under `prefix`. A cancelled fetch's result is
  /// discarded even if it arrives later. Returns the number cancelled.
  pub fn cancel(&self, prefix: &QueryKey) -> usize {
    let events = {
      let mut state = self.lock();
      Self::cancel_locked(&mut state, prefix)
    };
    let count = events.len();
    self.emit(events);
    count
  }

  fn cancel_locked(state: &mut CacheState, prefix: &QueryKey) -> Vec<CacheEvent> {
    state
      .slots
      .values_mut()
      .filter(|slot| slot.entry.key.starts_with(prefix))
      .filter_map(|slot| {
        slot.abort_fetch().then(|| {
          debug!(key = %slot.entry.key, "fetch cancelled");
          CacheEvent::Cancelled {
            key: slot.entry.key.clone(),
          }
        })
      })
      .collect()
  }

  /// Cancel fetches for `key`, snapshot its entry and write `data`, all under
  /// one lock acquisition. Returns the entry as it was before the write.
  pub fn swap_optimistic(&self, key: &QueryKey, data: Value) -> Option<CacheEntry> {
    let (previous, mut events) = {
      let mut state = self.lock();
      let events = Self::cancel_locked(&mut state, key);
      let previous = state.slots.get(key).map(|slot| slot.entry.clone());
      state.slot_mut(key, self.options.stale_time).entry.write(data.clone());
      (previous, events)
    };
    debug!(key = %key, had_data = previous.is_some(), "optimistic write");
    events.push(CacheEvent::Updated {
      key: key.clone(),
      data: Some(data),
    });
    self.emit(events);
    previous
  }

  /// Overwrite the entry for `key` with a previously captured snapshot.
  /// An absent snapshot removes the entry.
  pub fn restore(&self, key: &QueryKey, snapshot: Option<CacheEntry>) {
    let event = {
      let mut state = self.lock();
      match snapshot {
        Some(entry) => {
          let slot = state.slot_mut(key, self.options.stale_time);
          let is_fetching = slot.in_flight.is_some();
          slot.entry = CacheEntry {
            is_fetching,
            ..entry
          };
          if is_fetching && slot.entry.data.is_none() {
            slot.entry.status = QueryStatus::Loading;
          }
          CacheEvent::Updated {
            key: key.clone(),
            data: slot.entry.data.clone(),
          }
        }
        None => {
          state.remove_or_reset(key);
          CacheEvent::Removed { key: key.clone() }
        }
      }
    };
    debug!(key = %key, "restored snapshot");
    self.emit(vec![event]);
  }

  // ---------------------------------------------------------------------------
  // Fetching
  // ---------------------------------------------------------------------------

  /// Spawn `future` as the current fetch for `key`, superseding any fetch
  /// already running for it. Must be called with the state lock held.
  fn launch(&self, state: &mut CacheState, key: &QueryKey, future: FetchFuture) -> CacheEvent {
    state.next_fetch_id += 1;
    let id = state.next_fetch_id;
    let slot = state.slot_mut(key, self.options.stale_time);

    if let Some(previous) = slot.in_flight.take() {
      previous.abort.abort();
      debug!(key = %key, fetch = previous.id, "fetch superseded");
    }

    let (tx, rx) = watch::channel(None);
    let cache = self.clone();
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
      let outcome = future.await;
      cache.complete(&task_key, id, outcome.clone());
      // Waiters may all be gone
      let _ = tx.send(Some(outcome));
    });

    slot.in_flight = Some(InFlight {
      id,
      abort: handle.abort_handle(),
      done: rx,
    });
    slot.entry.is_fetching = true;
    if slot.entry.data.is_none() {
      slot.entry.status = QueryStatus::Loading;
    }

    debug!(key = %key, fetch = id, "fetch started");
    CacheEvent::FetchStarted { key: key.clone() }
  }

  /// Apply a finished fetch, unless it is no longer the entry's current one.
  fn complete(&self, key: &QueryKey, id: u64, outcome: Result<Value, ErrorInfo>) {
    let event = {
      let mut state = self.lock();
      let Some(slot) = state.slots.get_mut(key) else {
        debug!(key = %key, fetch = id, "result discarded, entry removed");
        return;
      };
      if slot.in_flight.as_ref().map(|f| f.id) != Some(id) {
        debug!(key = %key, fetch = id, "result discarded, fetch no longer current");
        return;
      }

      slot.in_flight = None;
      slot.entry.is_fetching = false;
      match &outcome {
        Ok(data) => {
          slot.entry.write(data.clone());
          CacheEvent::Updated {
            key: key.clone(),
            data: Some(data.clone()),
          }
        }
        Err(error) => {
          slot.entry.status = QueryStatus::Error;
          slot.entry.error = Some(error.clone());
          CacheEvent::FetchFailed {
            key: key.clone(),
            error: error.clone(),
          }
        }
      }
    };

    if let Err(error) = &outcome {
      warn!(key = %key, error = %error, "fetch failed");
      self.notifier.notify(Toast::error(error.notification_title()));
    } else {
      debug!(key = %key, fetch = id, "fetch completed");
    }
    self.emit(vec![event]);
  }

  /// Start the registered fetcher for `key` unless a fetch is already running
  /// or the data is fresh for `stale_time`. Returns whether a fetch started.
  pub(crate) fn ensure_fresh(&self, key: &QueryKey, stale_time: Duration) -> bool {
    let event = {
      let mut state = self.lock();
      let Some(slot) = state.slots.get(key) else {
        return false;
      };
      if slot.in_flight.is_some() || !slot.entry.is_stale_for(stale_time) {
        return false;
      }
      let Some(future) = slot.future() else {
        return false;
      };
      self.launch(&mut state, key, future)
    };
    self.emit(vec![event]);
    true
  }

  /// Start the registered fetcher for `key` unconditionally.
  pub fn refetch(&self, key: &QueryKey) -> bool {
    let event = {
      let mut state = self.lock();
      let Some(future) = state.slots.get(key).and_then(Slot::future) else {
        return false;
      };
      self.launch(&mut state, key, future)
    };
    self.emit(vec![event]);
    true
  }

  /// Run `future` as the current fetch for `key`, whatever is registered.
  pub(crate) fn fetch_with(&self, key: &QueryKey, future: FetchFuture) {
    let event = {
      let mut state = self.lock();
      self.launch(&mut state, key, future)
    };
    self.emit(vec![event]);
  }

  /// Populate `key` in the background unless it already holds fresh data.
  /// The entry is not observed, so it is subject to garbage collection.
  pub fn prefetch(&self, key: &QueryKey, fetch: Fetcher) {
    {
      let mut state = self.lock();
      let slot = state.slot_mut(key, self.options.stale_time);
      if slot.fetcher.is_none() {
        slot.fetcher = Some(fetch.clone());
      }
      if slot.in_flight.is_some() || !slot.entry.is_stale() {
        return;
      }
    }
    self.fetch_with(key, fetch(QueryContext {
      key: key.clone(),
      data: None,
    }));
  }

  /// Return fresh data for `key`, fetching it (or joining the fetch already
  /// running) when needed.
  pub async fn fetch_query(&self, key: &QueryKey, fetch: Fetcher) -> Result<Value, ErrorInfo> {
    let (mut done, event) = {
      let mut state = self.lock();
      let stale_time = self.options.stale_time;
      let slot = state.slot_mut(key, stale_time);
      if slot.fetcher.is_none() {
        slot.fetcher = Some(fetch.clone());
      }

      if let Some(in_flight) = &slot.in_flight {
        (in_flight.done.clone(), None)
      } else if let (false, Some(data)) = (slot.entry.is_stale(), slot.entry.data.clone()) {
        return Ok(data);
      } else {
        let future = fetch(QueryContext {
          key: key.clone(),
          data: slot.entry.data.clone(),
        });
        let event = self.launch(&mut state, key, future);
        let done = state
          .slots
          .get(key)
          .and_then(|slot| slot.in_flight.as_ref())
          .map(|in_flight| in_flight.done.clone());
        match done {
          Some(done) => (done, Some(event)),
          None => return Err(ErrorInfo::cancelled()),
        }
      }
    };

    if let Some(event) = event {
      self.emit(vec![event]);
    }

    let outcome = match done.wait_for(Option::is_some).await {
      Ok(outcome) => outcome.clone(),
      Err(_) => None,
    };
    outcome.unwrap_or_else(|| Err(ErrorInfo::cancelled()))
  }

  /// Typed [`fetch_query`](Self::fetch_query).
  pub async fn fetch_query_data<T, F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<T, ErrorInfo>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(QueryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ErrorInfo>> + Send + 'static,
  {
    let value = self.fetch_query(key, fetcher(fetch)).await?;
    serde_json::from_value(value).map_err(ErrorInfo::from)
  }

  /// Wait until no fetch is outstanding for keys under `prefix`, including
  /// refetches started while waiting.
  pub async fn settled(&self, prefix: &QueryKey) {
    loop {
      let pending: Vec<watch::Receiver<FetchOutcome>> = self
        .lock()
        .slots
        .values()
        .filter(|slot| slot.entry.key.starts_with(prefix))
        .filter_map(|slot| slot.in_flight.as_ref().map(|f| f.done.clone()))
        .collect();

      if pending.is_empty() {
        return;
      }
      for mut done in pending {
        // A closed channel means the fetch was aborted
        let _ = done.wait_for(Option::is_some).await;
      }
    }
  }

  // ---------------------------------------------------------------------------
  // Observers
  // ---------------------------------------------------------------------------

  /// Register a binding on `key`: count it as an observer, make `fetch` the
  /// key's fetcher and seed `initial` data when the entry has none.
  pub(crate) fn observe(
    &self,
    key: &QueryKey,
    fetch: Fetcher,
    stale_time: Duration,
    initial: Option<Value>,
  ) {
    self.collect_garbage();

    let event = {
      let mut state = self.lock();
      let slot = state.slot_mut(key, stale_time);
      slot.observers += 1;
      slot.fetcher = Some(fetch);
      slot.entry.stale_time = stale_time;

      match initial {
        Some(data) if slot.entry.data.is_none() && slot.in_flight.is_none() => {
          slot.entry.write(data.clone());
          Some(CacheEvent::Updated {
            key: key.clone(),
            data: Some(data),
          })
        }
        _ => None,
      }
    };
    self.emit(event.into_iter().collect());
  }

  /// Unregister a binding. When the last observer leaves, the
  /// garbage-collection clock starts and, with `cancel_fetch`, its pending
  /// fetch is aborted.
  pub(crate) fn unobserve(&self, key: &QueryKey, cancel_fetch: bool) {
    let event = {
      let mut state = self.lock();
      let Some(slot) = state.slots.get_mut(key) else {
        return;
      };
      slot.observers = slot.observers.saturating_sub(1);
      if slot.observers > 0 {
        return;
      }
      slot.unobserved_since = Utc::now();
      if !cancel_fetch {
        return;
      }
      slot.abort_fetch().then(|| {
        debug!(key = %key, "fetch cancelled, no observers left");
        CacheEvent::Cancelled { key: key.clone() }
      })
    };
    self.emit(event.into_iter().collect());
  }

  /// Drop entries nobody has observed for longer than `cache_time`.
  pub fn collect_garbage(&self) -> usize {
    let cache_time = self.options.cache_time;
    let events: Vec<CacheEvent> = {
      let mut state = self.lock();
      let now = Utc::now();
      let expired: Vec<QueryKey> = state
        .slots
        .iter()
        .filter(|(_, slot)| slot.observers == 0 && slot.in_flight.is_none())
        .filter(|(_, slot)| {
          now
            .signed_duration_since(slot.unobserved_since)
            .to_std()
            .map(|idle| idle >= cache_time)
            .unwrap_or(false)
        })
        .map(|(key, _)| key.clone())
        .collect();

      for key in &expired {
        state.slots.remove(key);
      }
      expired
        .into_iter()
        .map(|key| CacheEvent::Removed { key })
        .collect()
    };

    if !events.is_empty() {
      debug!(count = events.len(), "garbage collected queries");
    }
    let count = events.len();
    self.emit(events);
    count
  }

  // ---------------------------------------------------------------------------
  // Subscriptions
  // ---------------------------------------------------------------------------

  /// Queue events for keys matching `filter` on a channel.
  pub fn subscribe(&self, filter: KeyFilter) -> Subscription {
    events::subscribe(&self.listeners, filter)
  }

  /// Invoke `callback` for events on keys matching `filter`. The callback runs
  /// after the cache lock is released.
  pub fn listen<F>(&self, filter: KeyFilter, callback: F) -> Subscription
  where
    F: Fn(&CacheEvent) + Send + Sync + 'static,
  {
    events::listen(&self.listeners, filter, Arc::new(callback))
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new(CacheOptions::default())
  }
}

impl std::fmt::Debug for QueryCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryCache")
      .field("entries", &self.lock().slots.len())
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}
