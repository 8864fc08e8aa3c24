//! Paged accumulation for "load more" style listings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{Fetcher, KeyFilter, QueryCache, QueryContext, QueryKey, QueryStatus, Subscription};
use crate::error::ErrorInfo;

/// Pages fetched so far, with the parameter each one was fetched with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfiniteData<P, T> {
  pub pages: Vec<T>,
  pub page_params: Vec<P>,
}

impl<P, T> InfiniteData<P, T> {
  fn empty() -> Self {
    Self {
      pages: Vec::new(),
      page_params: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfiniteSnapshot<T> {
  pub pages: Vec<T>,
  pub status: QueryStatus,
  pub is_loading: bool,
  pub is_fetching: bool,
  pub is_error: bool,
  pub error: Option<ErrorInfo>,
  pub has_next_page: bool,
}

type PageFn<P, T> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<T, ErrorInfo>> + Send + Sync>;
type NextParamFn<P, T> = Arc<dyn Fn(&T) -> Option<P> + Send + Sync>;

/// Binding that accumulates an ordered list of pages under one key.
///
/// `next_param` maps the last page to the parameter of the following one, or
/// `None` when there are no more pages.
pub struct InfiniteQuery<P, T> {
  cache: QueryCache,
  key: QueryKey,
  fetch_page: PageFn<P, T>,
  next_param: NextParamFn<P, T>,
  subscription: Subscription,
}

impl<P, T> InfiniteQuery<P, T>
where
  P: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
  pub fn new<F, Fut, N>(
    cache: &QueryCache,
    key: QueryKey,
    initial_param: P,
    fetch_page: F,
    next_param: N,
  ) -> Self
  where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ErrorInfo>> + Send + 'static,
    N: Fn(&T) -> Option<P> + Send + Sync + 'static,
  {
    let fetch_page: PageFn<P, T> = Arc::new(move |param| fetch_page(param).boxed());
    let next_param: NextParamFn<P, T> = Arc::new(next_param);
    let stale_time: Duration = cache.options().stale_time;

    let query = Self {
      subscription: cache.subscribe(KeyFilter::Exact(key.clone())),
      cache: cache.clone(),
      key,
      fetch_page: fetch_page.clone(),
      next_param: next_param.clone(),
    };

    let refetch = refetch_pages(initial_param, fetch_page, next_param);
    query.cache.observe(&query.key, refetch, stale_time, None);
    query.cache.ensure_fresh(&query.key, stale_time);
    query
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  fn data(&self) -> Option<InfiniteData<P, T>> {
    self.cache.get_query_data(&self.key)
  }

  /// Parameter of the page after the last one fetched.
  fn pending_param(&self, data: &InfiniteData<P, T>) -> Option<P> {
    data.pages.last().and_then(|page| (self.next_param)(page))
  }

  pub fn has_next_page(&self) -> bool {
    self
      .data()
      .map(|data| self.pending_param(&data).is_some())
      .unwrap_or(false)
  }

  /// Append the next page. Returns false when there is no next page or a
  /// fetch is already running for the key.
  pub fn fetch_next_page(&self) -> bool {
    let Some(entry) = self.cache.get(&self.key) else {
      return false;
    };
    if entry.is_fetching {
      return false;
    }
    let Some(mut data) = entry.data_as::<InfiniteData<P, T>>() else {
      return false;
    };
    let Some(param) = self.pending_param(&data) else {
      debug!(key = %self.key, "no next page");
      return false;
    };

    let fetch = self.fetch_page.clone();
    let future = async move {
      let page = fetch(param.clone()).await?;
      data.pages.push(page);
      data.page_params.push(param);
      serde_json::to_value(data).map_err(ErrorInfo::from)
    };
    debug!(key = %self.key, "fetching next page");
    self.cache.fetch_with(&self.key, future.boxed());
    true
  }

  pub fn poll(&mut self) -> bool {
    !self.subscription.drain().is_empty()
  }

  pub async fn settled(&self) {
    self.cache.settled(&self.key).await;
  }

  pub fn snapshot(&self) -> InfiniteSnapshot<T> {
    let entry = self.cache.get(&self.key);
    let data = entry
      .as_ref()
      .and_then(|entry| entry.data_as::<InfiniteData<P, T>>());
    let has_next_page = data
      .as_ref()
      .map(|data| self.pending_param(data).is_some())
      .unwrap_or(false);
    let status = entry
      .as_ref()
      .map(|entry| entry.status)
      .unwrap_or(QueryStatus::Idle);

    InfiniteSnapshot {
      pages: data.map(|data| data.pages).unwrap_or_default(),
      status,
      is_loading: status == QueryStatus::Loading,
      is_fetching: entry.as_ref().map(|e| e.is_fetching).unwrap_or(false),
      is_error: status == QueryStatus::Error,
      error: entry.and_then(|entry| entry.error),
      has_next_page,
    }
  }
}

/// Fetcher that refetches as many pages as the entry currently holds,
/// starting again from the first parameter.
fn refetch_pages<P, T>(initial_param: P, fetch_page: PageFn<P, T>, next_param: NextParamFn<P, T>) -> Fetcher
where
  P: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
  T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
  Arc::new(move |ctx: QueryContext| {
    let page_count = ctx
      .data_as::<InfiniteData<P, T>>()
      .map(|data| data.pages.len())
      .unwrap_or(0)
      .max(1);
    let fetch_page = fetch_page.clone();
    let next_param = next_param.clone();
    let mut param = initial_param.clone();

    async move {
      let mut data = InfiniteData::empty();
      for _ in 0..page_count {
        let page = fetch_page(param.clone()).await?;
        let next = next_param(&page);
        data.pages.push(page);
        data.page_params.push(param);
        match next {
          Some(next) => param = next,
          None => break,
        }
      }
      serde_json::to_value(data).map_err(ErrorInfo::from)
    }
    .boxed()
  })
}

impl<P, T> Drop for InfiniteQuery<P, T> {
  fn drop(&mut self) {
    self.cache.unobserve(&self.key, true);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Page {
    results: Vec<u32>,
    next: Option<String>,
  }

  fn page_for(url: &str) -> Page {
    match url {
      "page1" => Page {
        results: vec![1, 2, 3],
        next: Some("page2".to_string()),
      },
      _ => Page {
        results: vec![4, 5],
        next: None,
      },
    }
  }

  fn people(cache: &QueryCache, calls: Arc<AtomicU32>) -> InfiniteQuery<String, Page> {
    InfiniteQuery::new(
      cache,
      query_key!["sw-people"],
      "page1".to_string(),
      move |url: String| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(page_for(&url)) }
      },
      |page: &Page| page.next.clone().filter(|next| !next.is_empty()),
    )
  }

  #[tokio::test]
  async fn test_accumulates_pages_until_exhausted() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = people(&cache, calls.clone());

    assert!(query.snapshot().is_loading);
    query.settled().await;
    assert!(query.poll());
    assert!(!query.poll());
    assert!(query.has_next_page());

    assert!(query.fetch_next_page());
    // Already fetching
    assert!(!query.fetch_next_page());
    query.settled().await;

    let snapshot = query.snapshot();
    let total: usize = snapshot.pages.iter().map(|p| p.results.len()).sum();
    assert_eq!(total, 5);
    assert!(!snapshot.has_next_page);
    assert!(!query.fetch_next_page());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_refetch_reloads_every_page() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let query = people(&cache, calls.clone());
    query.settled().await;
    query.fetch_next_page();
    query.settled().await;

    cache.invalidate(&query_key!["sw-people"]);
    query.settled().await;

    let data: InfiniteData<String, Page> = cache.get_query_data(query.key()).unwrap();
    assert_eq!(data.page_params, vec!["page1".to_string(), "page2".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_failed_page_keeps_accumulated_pages() {
    let cache = QueryCache::default();
    let query: InfiniteQuery<u32, Page> = InfiniteQuery::new(
      &cache,
      query_key!["numbers"],
      1,
      |n: u32| async move {
        if n == 1 {
          Ok(Page {
            results: vec![1],
            next: Some("2".to_string()),
          })
        } else {
          Err(ErrorInfo::transport("boom"))
        }
      },
      |page: &Page| page.next.as_ref().and_then(|n| n.parse().ok()),
    );
    query.settled().await;

    query.fetch_next_page();
    query.settled().await;

    let snapshot = query.snapshot();
    assert!(snapshot.is_error);
    assert_eq!(snapshot.pages.len(), 1);
    assert!(snapshot.has_next_page);
  }
}
