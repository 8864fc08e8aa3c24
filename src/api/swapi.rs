//! Gateway for the Star Wars people listing.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use super::client::ApiClient;
use super::types::PeoplePage;

#[async_trait]
pub trait SwapiApi: Send + Sync {
  /// Fetch the page at `url` (the first page URL or a `next` link).
  async fn fetch_people(&self, url: &str) -> Result<PeoplePage>;
}

/// [`SwapiApi`] over HTTP.
#[derive(Clone)]
pub struct HttpSwapiApi {
  client: ApiClient,
}

impl HttpSwapiApi {
  pub fn new(base_url: &str) -> Result<Self> {
    Ok(Self {
      client: ApiClient::new(base_url)?,
    })
  }

  /// URL of the first page.
  pub fn first_page(&self) -> String {
    self.client.base_url().to_string()
  }
}

#[async_trait]
impl SwapiApi for HttpSwapiApi {
  async fn fetch_people(&self, url: &str) -> Result<PeoplePage> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid page URL {}: {}", url, e))?;
    self.client.get_url(url, None).await
  }
}
