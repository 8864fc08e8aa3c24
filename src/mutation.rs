//! Mutation orchestrator.
//!
//! A [`Mutation`] runs a write against a gateway with lifecycle hooks around
//! it:
//!
//! 1. `on_mutate` runs synchronously inside [`Mutation::mutate`], before the
//!    remote call is spawned. Optimistic mutations use it to build a
//!    [`MutationContext`], which cancels fetches for the key, snapshots the
//!    entry and writes the optimistic value in one cache operation.
//! 2. The remote call runs as its own task and completes even if the caller
//!    stops waiting for it.
//! 3. `on_error` (with the context) or `on_success` runs once it resolves.
//!    Failures also raise an error notification.
//! 4. `on_settled` runs last, whatever the outcome.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, QueryCache, QueryKey};
use crate::error::ErrorInfo;
use crate::notify::Toast;

/// Lifecycle state of a mutation binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
  Idle,
  Pending,
  Success,
  Error,
}

/// What a consumer renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSnapshot<O> {
  pub status: MutationStatus,
  pub data: Option<O>,
  pub error: Option<ErrorInfo>,
  pub is_loading: bool,
  pub is_error: bool,
  pub is_success: bool,
}

/// Snapshot taken when an optimistic mutation begins, consumed on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationContext {
  pub key: QueryKey,
  /// The entry as it was before the optimistic write, absent if there was none
  pub previous: Option<CacheEntry>,
}

impl MutationContext {
  /// Cancel fetches for `key`, snapshot it and write `optimistic`, as one
  /// cache operation.
  pub fn begin(cache: &QueryCache, key: QueryKey, optimistic: Value) -> Self {
    let previous = cache.swap_optimistic(&key, optimistic);
    Self { key, previous }
  }

  /// Data held before the optimistic write, ignoring `null`.
  pub fn previous_data(&self) -> Option<&Value> {
    self
      .previous
      .as_ref()
      .and_then(|entry| entry.data.as_ref())
      .filter(|data| !data.is_null())
  }

  /// Put the snapshot back, overwriting whatever the key holds now.
  pub fn rollback(&self, cache: &QueryCache) {
    info!(key = %self.key, "rolling back optimistic update");
    cache.restore(&self.key, self.previous.clone());
  }
}

type MutateFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, ErrorInfo>> + Send + Sync>;
type OnMutateFn<I, C> = Arc<dyn Fn(&QueryCache, &I) -> C + Send + Sync>;
type OnErrorFn<I, C> = Arc<dyn Fn(&QueryCache, &ErrorInfo, &I, Option<&C>) + Send + Sync>;
type OnSuccessFn<I, O> = Arc<dyn Fn(&QueryCache, &O, &I) + Send + Sync>;
type OnSettledFn<I, O> = Arc<dyn Fn(&QueryCache, Option<&O>, Option<&ErrorInfo>, &I) + Send + Sync>;

/// Configures a [`Mutation`]. `C` is the context produced by `on_mutate`.
pub struct MutationBuilder<I, O, C = ()> {
  name: &'static str,
  cache: QueryCache,
  mutate_fn: MutateFn<I, O>,
  on_mutate: Option<OnMutateFn<I, C>>,
  on_error: Option<OnErrorFn<I, C>>,
  on_success: Option<OnSuccessFn<I, O>>,
  on_settled: Option<OnSettledFn<I, O>>,
}

impl<I, O> MutationBuilder<I, O, ()>
where
  I: Clone + Send + Sync + 'static,
  O: Clone + Send + Sync + 'static,
{
  /// Run before the remote call. The returned context is handed to
  /// `on_error`.
  pub fn on_mutate<C, F>(self, on_mutate: F) -> MutationBuilder<I, O, C>
  where
    F: Fn(&QueryCache, &I) -> C + Send + Sync + 'static,
  {
    MutationBuilder {
      name: self.name,
      cache: self.cache,
      mutate_fn: self.mutate_fn,
      on_mutate: Some(Arc::new(on_mutate)),
      on_error: None,
      on_success: self.on_success,
      on_settled: self.on_settled,
    }
  }
}

impl<I, O, C> MutationBuilder<I, O, C>
where
  I: Clone + Send + Sync + 'static,
  O: Clone + Send + Sync + 'static,
  C: Send + Sync + 'static,
{
  pub fn on_error<F>(mut self, on_error: F) -> Self
  where
    F: Fn(&QueryCache, &ErrorInfo, &I, Option<&C>) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(on_error));
    self
  }

  pub fn on_success<F>(mut self, on_success: F) -> Self
  where
    F: Fn(&QueryCache, &O, &I) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(on_success));
    self
  }

  pub fn on_settled<F>(mut self, on_settled: F) -> Self
  where
    F: Fn(&QueryCache, Option<&O>, Option<&ErrorInfo>, &I) + Send + Sync + 'static,
  {
    self.on_settled = Some(Arc::new(on_settled));
    self
  }

  pub fn build(self) -> Mutation<I, O, C> {
    Mutation {
      inner: Arc::new(Inner {
        name: self.name,
        cache: self.cache,
        mutate_fn: self.mutate_fn,
        on_mutate: self.on_mutate,
        on_error: self.on_error,
        on_success: self.on_success,
        on_settled: self.on_settled,
        state: Mutex::new(MutationState {
          status: MutationStatus::Idle,
          data: None,
          error: None,
          latest: 0,
          pending: 0,
        }),
      }),
    }
  }
}

struct MutationState<O> {
  status: MutationStatus,
  data: Option<O>,
  error: Option<ErrorInfo>,
  /// Id of the most recent invocation; only it updates the reported status
  latest: u64,
  pending: usize,
}

struct Inner<I, O, C> {
  name: &'static str,
  cache: QueryCache,
  mutate_fn: MutateFn<I, O>,
  on_mutate: Option<OnMutateFn<I, C>>,
  on_error: Option<OnErrorFn<I, C>>,
  on_success: Option<OnSuccessFn<I, O>>,
  on_settled: Option<OnSettledFn<I, O>>,
  state: Mutex<MutationState<O>>,
}

impl<I, O, C> Inner<I, O, C> {
  fn lock(&self) -> MutexGuard<'_, MutationState<O>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// A write operation bound to the cache. Cloning shares the reported state.
pub struct Mutation<I, O, C = ()> {
  inner: Arc<Inner<I, O, C>>,
}

impl<I, O, C> Clone for Mutation<I, O, C> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<I, O> Mutation<I, O, ()>
where
  I: Clone + Send + Sync + 'static,
  O: Clone + Send + Sync + 'static,
{
  /// Start configuring a mutation performing `mutate_fn`.
  pub fn builder<F, Fut>(name: &'static str, cache: &QueryCache, mutate_fn: F) -> MutationBuilder<I, O, ()>
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ErrorInfo>> + Send + 'static,
  {
    MutationBuilder {
      name,
      cache: cache.clone(),
      mutate_fn: Arc::new(move |input| mutate_fn(input).boxed()),
      on_mutate: None,
      on_error: None,
      on_success: None,
      on_settled: None,
    }
  }
}

impl<I, O, C> Mutation<I, O, C>
where
  I: Clone + Send + Sync + 'static,
  O: Clone + Send + Sync + 'static,
  C: Send + Sync + 'static,
{
  /// Begin the mutation and spawn its remote call.
  ///
  /// `on_mutate` has already run when this returns, so optimistic values are
  /// visible in the cache immediately. The returned handle can be awaited
  /// for the outcome or dropped.
  pub fn mutate(&self, input: I) -> JoinHandle<Result<O, ErrorInfo>> {
    let id = {
      let mut state = self.inner.lock();
      state.latest += 1;
      state.pending += 1;
      state.status = MutationStatus::Pending;
      state.error = None;
      state.latest
    };
    debug!(mutation = self.inner.name, id, "mutation started");

    let context = self
      .inner
      .on_mutate
      .as_ref()
      .map(|on_mutate| on_mutate(&self.inner.cache, &input));
    let call = (self.inner.mutate_fn)(input.clone());

    let inner = self.inner.clone();
    tokio::spawn(async move {
      let result = call.await;
      inner.settle(id, &input, context, result)
    })
  }

  /// [`mutate`](Self::mutate) and wait for the outcome.
  pub async fn mutate_async(&self, input: I) -> Result<O, ErrorInfo> {
    match self.mutate(input).await {
      Ok(result) => result,
      Err(e) if e.is_cancelled() => Err(ErrorInfo::cancelled()),
      Err(e) => Err(ErrorInfo::transport(format!("Mutation task failed: {}", e))),
    }
  }

  /// Forget the last outcome. Has no effect while an invocation is pending.
  pub fn reset(&self) {
    let mut state = self.inner.lock();
    if state.pending == 0 {
      state.status = MutationStatus::Idle;
      state.data = None;
      state.error = None;
    }
  }

  pub fn status(&self) -> MutationStatus {
    self.inner.lock().status
  }

  pub fn snapshot(&self) -> MutationSnapshot<O> {
    let state = self.inner.lock();
    MutationSnapshot {
      status: state.status,
      data: state.data.clone(),
      error: state.error.clone(),
      is_loading: state.status == MutationStatus::Pending,
      is_error: state.status == MutationStatus::Error,
      is_success: state.status == MutationStatus::Success,
    }
  }
}

impl<I, O, C> Inner<I, O, C>
where
  I: Clone + Send + Sync + 'static,
  O: Clone + Send + Sync + 'static,
  C: Send + Sync + 'static,
{
  fn settle(
    &self,
    id: u64,
    input: &I,
    context: Option<C>,
    result: Result<O, ErrorInfo>,
  ) -> Result<O, ErrorInfo> {
    match &result {
      Ok(data) => {
        info!(mutation = self.name, id, "mutation succeeded");
        if let Some(on_success) = &self.on_success {
          on_success(&self.cache, data, input);
        }
      }
      Err(error) => {
        warn!(mutation = self.name, id, error = %error, "mutation failed");
        self
          .cache
          .notifier()
          .notify(Toast::error(error.notification_title()));
        if let Some(on_error) = &self.on_error {
          on_error(&self.cache, error, input, context.as_ref());
        }
      }
    }

    if let Some(on_settled) = &self.on_settled {
      on_settled(&self.cache, result.as_ref().ok(), result.as_ref().err(), input);
    }

    let mut state = self.lock();
    state.pending = state.pending.saturating_sub(1);
    if state.latest == id {
      match &result {
        Ok(data) => {
          state.status = MutationStatus::Success;
          state.data = Some(data.clone());
          state.error = None;
        }
        Err(error) => {
          state.status = MutationStatus::Error;
          state.error = Some(error.clone());
        }
      }
    }
    debug!(mutation = self.name, id, "mutation settled");
    result
  }
}

impl<I, O, C> std::fmt::Debug for Mutation<I, O, C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.inner.lock();
    f.debug_struct("Mutation")
      .field("name", &self.inner.name)
      .field("status", &state.status)
      .field("pending", &state.pending)
      .finish_non_exhaustive()
  }
}
