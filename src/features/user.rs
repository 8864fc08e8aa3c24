//! Signed-in user: cached query, persisted mirror and optimistic profile edits.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{LazyDaysApi, User};
use crate::cache::{names, QueryCache, QueryContext, QueryKey, Subscription};
use crate::error::ErrorInfo;
use crate::mirror::{user_value, PersistenceMirror};
use crate::mutation::{Mutation, MutationContext, MutationSnapshot};
use crate::notify::Toast;
use crate::query::{Query, QueryOptions};
use crate::query_key;

pub const USER_UPDATED: &str = "User updated!";
pub const USER_UPDATE_FAILED: &str = "Update failed! Restoring previous update.";

pub fn user_key() -> QueryKey {
  query_key![names::USER]
}

/// Input of the profile patch: the edited user and the user it was edited from.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchUserInput {
  pub updated: User,
  pub original: Option<User>,
}

pub type PatchUserMutation = Mutation<PatchUserInput, Option<User>, MutationContext>;

/// Owner of the `["user"]` entry.
pub struct UserStore {
  cache: QueryCache,
  query: Query<Option<User>>,
  patch: PatchUserMutation,
  _mirror: Option<Subscription>,
}

impl UserStore {
  /// Bind the user query, seeding it from `mirror` when one is given. The
  /// mirror then follows every value the cache holds for the user.
  pub fn new(cache: &QueryCache, api: Arc<dyn LazyDaysApi>, mirror: Option<PersistenceMirror>) -> Self {
    let stored = mirror.as_ref().and_then(PersistenceMirror::load);
    let attached = mirror.as_ref().map(|mirror| mirror.attach(cache));

    let fetch_api = api.clone();
    let query = Query::new(
      cache,
      user_key(),
      move |ctx: QueryContext| {
        let api = fetch_api.clone();
        // Re-read whichever user the cache held when the fetch started
        let current: Option<User> = ctx.data_as::<Option<User>>().flatten();
        async move { api.get_user(current.as_ref()).await.map_err(ErrorInfo::from) }
      },
      QueryOptions::default().initial_data(stored),
    );

    Self {
      cache: cache.clone(),
      patch: patch_user_mutation(cache, api),
      query,
      _mirror: attached,
    }
  }

  pub fn user(&self) -> Option<User> {
    self
      .cache
      .get_query_data::<Option<User>>(&user_key())
      .flatten()
  }

  pub fn query(&mut self) -> &mut Query<Option<User>> {
    &mut self.query
  }

  /// Store a user obtained outside the query, e.g. from sign-in.
  pub fn update_user(&self, user: &User) {
    info!(user = user.id, "user updated");
    self.cache.set(&user_key(), user_value(Some(user)));
  }

  /// Sign out: forget the user and every appointment cached for one.
  pub fn clear_user(&self) {
    info!("user cleared");
    self.cache.set(&user_key(), Value::Null);
    self
      .cache
      .remove(&query_key![names::APPOINTMENTS, names::USER]);
  }

  /// Re-read the user from the server.
  pub fn refresh(&self) -> bool {
    self.query.refetch()
  }

  /// Optimistically apply `updated` and send the change to the server.
  pub fn patch_user(&self, updated: User) -> JoinHandle<Result<Option<User>, ErrorInfo>> {
    self.patch.mutate(PatchUserInput {
      updated,
      original: self.user(),
    })
  }

  pub fn patch_status(&self) -> MutationSnapshot<Option<User>> {
    self.patch.snapshot()
  }
}

impl std::fmt::Debug for UserStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("UserStore")
      .field("query", &self.query)
      .field("patch", &self.patch)
      .finish_non_exhaustive()
  }
}

/// Optimistic profile update against `["user"]`.
pub fn patch_user_mutation(cache: &QueryCache, api: Arc<dyn LazyDaysApi>) -> PatchUserMutation {
  Mutation::builder("patch user", cache, move |input: PatchUserInput| {
    let api = api.clone();
    async move {
      api
        .patch_user(Some(&input.updated), input.original.as_ref())
        .await
        .map_err(ErrorInfo::from)
    }
  })
  .on_mutate(|cache, input: &PatchUserInput| {
    MutationContext::begin(cache, user_key(), user_value(Some(&input.updated)))
  })
  .on_error(|cache, _, _, context| {
    let Some(context) = context else {
      return;
    };
    context.rollback(cache);
    if context.previous_data().is_some() {
      cache.notifier().notify(Toast::warning(USER_UPDATE_FAILED));
    }
  })
  .on_success(|cache, user, _| {
    if user.is_some() {
      cache.notifier().notify(Toast::success(USER_UPDATED));
    }
  })
  .on_settled(|cache, _, _, _| {
    cache.invalidate(&user_key());
  })
  .build()
}
