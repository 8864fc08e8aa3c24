use std::sync::Arc;

use crate::api::{LazyDaysApi, Treatment};
use crate::cache::{fetcher, names, Fetcher, QueryCache, QueryKey};
use crate::error::ErrorInfo;
use crate::query::{Query, QueryOptions};
use crate::query_key;

pub fn treatments_key() -> QueryKey {
  query_key![names::TREATMENTS]
}

fn treatments_fetcher(api: Arc<dyn LazyDaysApi>) -> Fetcher {
  fetcher(move |_| {
    let api = api.clone();
    async move { api.get_treatments().await.map_err(ErrorInfo::from) }
  })
}

/// Treatments offered by the clinic.
pub struct Treatments {
  query: Query<Vec<Treatment>>,
}

impl Treatments {
  pub fn new(cache: &QueryCache, api: Arc<dyn LazyDaysApi>) -> Self {
    let query = Query::new(
      cache,
      treatments_key(),
      move |_| {
        let api = api.clone();
        async move { api.get_treatments().await.map_err(ErrorInfo::from) }
      },
      QueryOptions::default(),
    );
    Self { query }
  }

  /// Treatments, empty until loaded.
  pub fn treatments(&self) -> Vec<Treatment> {
    self.query.data().unwrap_or_default()
  }

  pub fn query(&mut self) -> &mut Query<Vec<Treatment>> {
    &mut self.query
  }
}

/// Warm the cache before the treatments are shown.
pub fn prefetch_treatments(cache: &QueryCache, api: Arc<dyn LazyDaysApi>) {
  cache.prefetch(&treatments_key(), treatments_fetcher(api));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{recording_cache, FakeLazyDays};

  fn clinic() -> Arc<FakeLazyDays> {
    let api = Arc::new(FakeLazyDays::default());
    api.treatments.lock().unwrap().push(Treatment {
      id: 1,
      name: "Massage".to_string(),
      duration_in_minutes: 60,
      description: "Relax".to_string(),
      image_url: None,
    });
    api
  }

  #[tokio::test]
  async fn test_prefetched_treatments_are_reused() {
    let (cache, _) = recording_cache();
    let api = clinic();

    prefetch_treatments(&cache, api.clone());
    prefetch_treatments(&cache, api.clone());
    cache.settled(&treatments_key()).await;

    let treatments = Treatments::new(&cache, api.clone());
    assert_eq!(treatments.treatments().len(), 1);
    assert_eq!(api.calls("get_treatments"), 1);
  }

  #[tokio::test]
  async fn test_fallback_is_empty() {
    let (cache, _) = recording_cache();
    let treatments = Treatments::new(&cache, clinic());
    assert!(treatments.treatments().is_empty());
    treatments.query.settled().await;
    assert_eq!(treatments.treatments()[0].name, "Massage");
  }
}
