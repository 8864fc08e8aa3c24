//! Change notifications for cache subscribers.
//!
//! Every state change on a cache entry enqueues a [`CacheEvent`] to each
//! listener whose filter matches the entry's key. Listeners are either
//! channels (drained by a binding's `poll`) or synchronous callbacks, which
//! are invoked after the cache lock has been released.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use super::key::QueryKey;
use crate::error::ErrorInfo;

/// What happened to a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
  /// Data was written, by a fetch or directly
  Updated { key: QueryKey, data: Option<Value> },
  /// A network call started for the key
  FetchStarted { key: QueryKey },
  /// The latest fetch failed
  FetchFailed { key: QueryKey, error: ErrorInfo },
  /// The entry was marked stale
  Invalidated { key: QueryKey },
  /// An outstanding fetch was aborted
  Cancelled { key: QueryKey },
  /// The entry was deleted
  Removed { key: QueryKey },
}

impl CacheEvent {
  pub fn key(&self) -> &QueryKey {
    match self {
      CacheEvent::Updated { key, .. }
      | CacheEvent::FetchStarted { key }
      | CacheEvent::FetchFailed { key, .. }
      | CacheEvent::Invalidated { key }
      | CacheEvent::Cancelled { key }
      | CacheEvent::Removed { key } => key,
    }
  }
}

/// Which keys a listener is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
  Exact(QueryKey),
  Prefix(QueryKey),
}

impl KeyFilter {
  pub fn matches(&self, key: &QueryKey) -> bool {
    match self {
      KeyFilter::Exact(k) => k == key,
      KeyFilter::Prefix(p) => key.starts_with(p),
    }
  }
}

pub(crate) type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
  Channel(mpsc::UnboundedSender<CacheEvent>),
  Callback(Callback),
}

struct Listener {
  id: u64,
  filter: KeyFilter,
  sink: Sink,
}

/// Registry of everything subscribed to a cache.
#[derive(Default)]
pub(crate) struct Listeners {
  next_id: u64,
  entries: Vec<Listener>,
}

pub(crate) type SharedListeners = Arc<Mutex<Listeners>>;

impl Listeners {
  fn add(&mut self, filter: KeyFilter, sink: Sink) -> u64 {
    self.next_id += 1;
    let id = self.next_id;
    self.entries.push(Listener { id, filter, sink });
    id
  }

  fn remove(&mut self, id: u64) {
    self.entries.retain(|l| l.id != id);
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }
}

/// Register a channel listener and return its subscription handle.
pub(crate) fn subscribe(listeners: &SharedListeners, filter: KeyFilter) -> Subscription {
  let (tx, rx) = mpsc::unbounded_channel();
  let id = lock(listeners).add(filter, Sink::Channel(tx));
  Subscription {
    id,
    rx: Some(rx),
    registry: Arc::downgrade(listeners),
  }
}

/// Register a callback listener and return its subscription handle.
pub(crate) fn listen(
  listeners: &SharedListeners,
  filter: KeyFilter,
  callback: Callback,
) -> Subscription {
  let id = lock(listeners).add(filter, Sink::Callback(callback));
  Subscription {
    id,
    rx: None,
    registry: Arc::downgrade(listeners),
  }
}

/// Deliver events to every matching listener.
///
/// Sinks are collected under the registry lock and invoked after it is
/// released, so callbacks may freely call back into the cache.
pub(crate) fn dispatch(listeners: &SharedListeners, events: Vec<CacheEvent>) {
  if events.is_empty() {
    return;
  }

  let deliveries: Vec<(Sink, CacheEvent)> = {
    let registry = lock(listeners);
    events
      .into_iter()
      .flat_map(|event| {
        registry
          .entries
          .iter()
          .filter(|l| l.filter.matches(event.key()))
          .map(|l| (l.sink.clone(), event.clone()))
          .collect::<Vec<_>>()
      })
      .collect()
  };

  for (sink, event) in deliveries {
    match sink {
      // Receiver dropped; its subscription removes the listener on drop
      Sink::Channel(tx) => {
        let _ = tx.send(event);
      }
      Sink::Callback(callback) => callback(&event),
    }
  }
}

fn lock(listeners: &SharedListeners) -> std::sync::MutexGuard<'_, Listeners> {
  listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for a registered listener. Dropping it unregisters the listener.
pub struct Subscription {
  id: u64,
  rx: Option<mpsc::UnboundedReceiver<CacheEvent>>,
  registry: Weak<Mutex<Listeners>>,
}

impl Subscription {
  /// Next queued event, without waiting.
  pub fn try_recv(&mut self) -> Option<CacheEvent> {
    self.rx.as_mut().and_then(|rx| rx.try_recv().ok())
  }

  /// Drain every queued event.
  pub fn drain(&mut self) -> Vec<CacheEvent> {
    std::iter::from_fn(|| self.try_recv()).collect()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      lock(&registry).remove(self.id);
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("id", &self.id)
      .field("channel", &self.rx.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[test]
  fn test_dispatch_respects_filters() {
    let listeners: SharedListeners = Arc::default();
    let mut exact = subscribe(&listeners, KeyFilter::Exact(query_key!["posts", 1]));
    let mut prefix = subscribe(&listeners, KeyFilter::Prefix(query_key!["posts"]));

    dispatch(
      &listeners,
      vec![
        CacheEvent::Invalidated {
          key: query_key!["posts", 1],
        },
        CacheEvent::Invalidated {
          key: query_key!["posts", 2],
        },
      ],
    );

    assert_eq!(exact.drain().len(), 1);
    assert_eq!(prefix.drain().len(), 2);
  }

  #[test]
  fn test_callback_and_unsubscribe_on_drop() {
    let listeners: SharedListeners = Arc::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = listen(
      &listeners,
      KeyFilter::Exact(query_key!["user"]),
      Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
      }),
    );

    let event = || {
      vec![CacheEvent::Removed {
        key: query_key!["user"],
      }]
    };
    dispatch(&listeners, event());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(handle);
    assert_eq!(lock(&listeners).len(), 0);
    dispatch(&listeners, event());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
