//! Durable copy of the signed-in user.
//!
//! The mirror only follows the cache: it listens to `["user"]` and writes
//! whatever the cache holds into storage. It never writes back into the cache.

use std::sync::{Arc, Mutex, PoisonError};

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::User;
use crate::cache::{names, CacheEvent, KeyFilter, MirrorStorage, QueryCache, QueryKey, Subscription};
use crate::query_key;

fn user_key() -> QueryKey {
  query_key![names::USER]
}

/// Storage key of the serialized user record.
pub const USER_STORAGE_KEY: &str = "lazyday_user";

#[derive(Clone)]
pub struct PersistenceMirror {
  storage: Arc<dyn MirrorStorage>,
}

impl PersistenceMirror {
  pub fn new(storage: Arc<dyn MirrorStorage>) -> Self {
    Self { storage }
  }

  pub fn save(&self, user: &User) -> Result<()> {
    let json = serde_json::to_string(user).map_err(|e| eyre!("Failed to serialize user: {}", e))?;
    self.storage.write(USER_STORAGE_KEY, &json)?;
    debug!(user = user.id, "user mirrored");
    Ok(())
  }

  /// The stored user. Unreadable records are treated as absent.
  pub fn load(&self) -> Option<User> {
    let json = match self.storage.read(USER_STORAGE_KEY) {
      Ok(json) => json?,
      Err(e) => {
        warn!("Failed to read stored user: {}", e);
        return None;
      }
    };

    match serde_json::from_str(&json) {
      Ok(user) => Some(user),
      Err(e) => {
        warn!("Discarding malformed stored user: {}", e);
        None
      }
    }
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.remove(USER_STORAGE_KEY)?;
    debug!("stored user cleared");
    Ok(())
  }

  /// Keep storage in step with the cached user until the returned
  /// subscription is dropped.
  ///
  /// Events only say that `["user"]` changed. Each one re-reads the entry and
  /// stores what the cache holds at that moment, so events delivered out of
  /// write order still leave storage matching the cache.
  pub fn attach(&self, cache: &QueryCache) -> Subscription {
    let mirror = self.clone();
    let source = cache.clone();
    let syncing = Arc::new(Mutex::new(()));
    cache.listen(KeyFilter::Exact(user_key()), move |event| {
      if matches!(event, CacheEvent::Updated { .. } | CacheEvent::Removed { .. }) {
        // Read and write as one step; the last sync always sees the last write
        let _guard = syncing.lock().unwrap_or_else(PoisonError::into_inner);
        mirror.sync(source.get(event.key()).and_then(|entry| entry.data));
      }
    })
  }

  fn sync(&self, data: Option<Value>) {
    let result = match data {
      Some(value) if !value.is_null() => match serde_json::from_value::<User>(value) {
        Ok(user) => self.save(&user),
        Err(e) => Err(eyre!("Cached user has an unexpected shape: {}", e)),
      },
      _ => self.clear(),
    };

    if let Err(e) = result {
      warn!("Failed to mirror user: {}", e);
    }
  }
}

impl std::fmt::Debug for PersistenceMirror {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PersistenceMirror").finish_non_exhaustive()
  }
}

/// Serialize `user` for the `["user"]` entry, `null` when signed out.
pub(crate) fn user_value(user: Option<&User>) -> Value {
  user
    .and_then(|user| serde_json::to_value(user).ok())
    .unwrap_or(Value::Null)
}
