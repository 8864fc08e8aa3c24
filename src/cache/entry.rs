//! Cache entries and their status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::key::QueryKey;
use crate::error::ErrorInfo;

/// Data state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing has been requested, or the only fetch was cancelled
  Idle,
  /// First fetch in flight, no data produced yet
  Loading,
  /// Data present
  Success,
  /// Last fetch failed
  Error,
}

/// Snapshot of one keyed query held by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: QueryKey,
  /// Last data produced for the key, absent until the first success
  pub data: Option<Value>,
  pub status: QueryStatus,
  pub error: Option<ErrorInfo>,
  /// When `data` was last written
  pub updated_at: Option<DateTime<Utc>>,
  /// How long `data` stays fresh after `updated_at`
  pub stale_time: Duration,
  /// Set by invalidation, cleared by the next successful write
  pub is_invalidated: bool,
  /// A network call for this key is outstanding
  pub is_fetching: bool,
}

impl CacheEntry {
  pub fn new(key: QueryKey, stale_time: Duration) -> Self {
    Self {
      key,
      data: None,
      status: QueryStatus::Idle,
      error: None,
      updated_at: None,
      stale_time,
      is_invalidated: false,
      is_fetching: false,
    }
  }

  /// Whether the data is missing, invalidated or older than `stale_time`.
  pub fn is_stale(&self) -> bool {
    self.is_stale_for(self.stale_time)
  }

  /// Staleness against a caller-provided window.
  pub fn is_stale_for(&self, stale_time: Duration) -> bool {
    if self.is_invalidated || self.data.is_none() {
      return true;
    }

    let Some(updated_at) = self.updated_at else {
      return true;
    };

    let elapsed = Utc::now()
      .signed_duration_since(updated_at)
      .to_std()
      .unwrap_or(Duration::ZERO);

    elapsed >= stale_time
  }

  /// Decode the entry's data into `T`.
  pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
    self
      .data
      .clone()
      .and_then(|value| serde_json::from_value(value).ok())
  }

  /// Record a successful write of `data`.
  pub(crate) fn write(&mut self, data: Value) {
    self.data = Some(data);
    self.status = QueryStatus::Success;
    self.error = None;
    self.updated_at = Some(Utc::now());
    self.is_invalidated = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use serde_json::json;

  #[test]
  fn test_empty_entry_is_stale() {
    let entry = CacheEntry::new(query_key!["user"], Duration::from_secs(600));
    assert!(entry.is_stale());
    assert_eq!(entry.status, QueryStatus::Idle);
  }

  #[test]
  fn test_written_entry_is_fresh_until_invalidated() {
    let mut entry = CacheEntry::new(query_key!["user"], Duration::from_secs(600));
    entry.write(json!({"id": 1}));
    assert!(!entry.is_stale());
    assert_eq!(entry.status, QueryStatus::Success);

    entry.is_invalidated = true;
    assert!(entry.is_stale());
  }

  #[test]
  fn test_zero_stale_time_is_always_stale() {
    let mut entry = CacheEntry::new(query_key!["posts", 1], Duration::ZERO);
    entry.write(json!([]));
    assert!(entry.is_stale());
  }

  #[test]
  fn test_old_data_goes_stale() {
    let mut entry = CacheEntry::new(query_key!["posts", 1], Duration::from_secs(2));
    entry.write(json!([]));
    entry.updated_at = Some(Utc::now() - chrono::Duration::seconds(5));
    assert!(entry.is_stale());
    assert!(!entry.is_stale_for(Duration::from_secs(60)));
  }
}
