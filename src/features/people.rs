use std::sync::Arc;

use crate::api::{PeoplePage, Person, SwapiApi};
use crate::cache::{names, QueryCache, QueryKey};
use crate::error::ErrorInfo;
use crate::query::{InfiniteQuery, InfiniteSnapshot};
use crate::query_key;

pub fn people_key() -> QueryKey {
  query_key![names::PEOPLE]
}

/// Star Wars characters, loaded one page at a time.
pub struct People {
  query: InfiniteQuery<String, PeoplePage>,
}

impl People {
  pub fn new(cache: &QueryCache, api: Arc<dyn SwapiApi>, first_page: impl Into<String>) -> Self {
    let query = InfiniteQuery::new(
      cache,
      people_key(),
      first_page.into(),
      move |url: String| {
        let api = api.clone();
        async move { api.fetch_people(&url).await.map_err(ErrorInfo::from) }
      },
      PeoplePage::next_url,
    );
    Self { query }
  }

  /// Everyone loaded so far, in page order.
  pub fn people(&self) -> Vec<Person> {
    self
      .query
      .snapshot()
      .pages
      .into_iter()
      .flat_map(|page| page.results)
      .collect()
  }

  pub fn has_next_page(&self) -> bool {
    self.query.has_next_page()
  }

  pub fn fetch_next_page(&self) -> bool {
    self.query.fetch_next_page()
  }

  pub fn snapshot(&self) -> InfiniteSnapshot<PeoplePage> {
    self.query.snapshot()
  }

  pub async fn settled(&self) {
    self.query.settled().await;
  }
}
