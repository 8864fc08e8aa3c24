//! JSON-over-HTTP client shared by the gateways.
//! Handles base URL resolution, bearer authentication and status mapping.

use color_eyre::{eyre::eyre, Result};
use reqwest::{
  header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
  Client, Method, RequestBuilder, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use url::Url;

use super::types::User;

/// Authorization header value for `user`, if it carries a token.
pub fn bearer(user: &User) -> Option<String> {
  user.token.as_ref().map(|token| format!("Bearer {}", token))
}

/// HTTP client bound to one API base URL.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  base_url: Url,
}

impl ApiClient {
  pub fn new(base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API URL {}: {}", base_url, e))?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static("lazyq"));

    let client = Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Resolve `path` (with optional query string) against the base URL.
  pub fn url(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid request path {}: {}", path, e))
  }

  /// GET `path` and decode the JSON body.
  pub async fn get<T: DeserializeOwned>(&self, path: &str, auth: Option<&str>) -> Result<T> {
    let url = self.url(path)?;
    self.get_url(url, auth).await
  }

  /// GET an absolute URL (e.g. a `next` link) and decode the JSON body.
  pub async fn get_url<T: DeserializeOwned>(&self, url: Url, auth: Option<&str>) -> Result<T> {
    let request = self.request(Method::GET, url, auth);
    decode(self.send(request).await?).await
  }

  /// PATCH `path` with a JSON body and decode the JSON response.
  pub async fn patch<B, T>(&self, path: &str, body: &B, auth: Option<&str>) -> Result<T>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let request = self.request(Method::PATCH, self.url(path)?, auth).json(body);
    decode(self.send(request).await?).await
  }

  /// DELETE `path`, ignoring any response body.
  pub async fn delete(&self, path: &str, auth: Option<&str>) -> Result<()> {
    let request = self.request(Method::DELETE, self.url(path)?, auth);
    self.send(request).await?;
    Ok(())
  }

  fn request(&self, method: Method, url: Url, auth: Option<&str>) -> RequestBuilder {
    debug!(%method, %url, "request");
    let request = self.client.request(method, url);
    match auth {
      Some(value) => request.header(AUTHORIZATION, value),
      None => request,
    }
  }

  async fn send(&self, request: RequestBuilder) -> Result<Response> {
    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request failed: {}", e))?;
    check_response(response).await
  }
}

/// Check response status and convert errors.
async fn check_response(response: Response) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  match status {
    StatusCode::UNAUTHORIZED => Err(eyre!("Authentication failed: invalid or expired token")),
    StatusCode::NOT_FOUND => Err(eyre!("Resource not found: {}", response.url())),
    status => Err(eyre!(
      "HTTP {}: {}",
      status,
      response.text().await.unwrap_or_default()
    )),
  }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
  let url = response.url().clone();
  response
    .json()
    .await
    .map_err(|e| eyre!("Failed to parse response from {}: {}", url, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use httpmock::prelude::*;
  use serde_json::{json, Value};

  #[tokio::test]
  async fn test_get_sends_bearer_and_decodes() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when
          .method(GET)
          .path("/user/1")
          .header("authorization", "Bearer abc");
        then.status(200).json_body(json!({"user": {"id": 1}}));
      })
      .await;

    let client = ApiClient::new(&server.base_url()).unwrap();
    let body: Value = client.get("/user/1", Some("Bearer abc")).await.unwrap();

    mock.assert_async().await;
    assert_eq!(body["user"]["id"], 1);
  }

  #[tokio::test]
  async fn test_error_statuses_are_reported() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/missing");
        then.status(404);
      })
      .await;
    server
      .mock_async(|when, then| {
        when.method(PATCH).path("/broken");
        then.status(500).body("boom");
      })
      .await;

    let client = ApiClient::new(&server.base_url()).unwrap();

    let err = client.get::<Value>("/missing", None).await.unwrap_err();
    assert!(err.to_string().starts_with("Resource not found"));

    let err = client
      .patch::<_, Value>("/broken", &json!({}), None)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("500"));
    assert!(err.to_string().contains("boom"));
  }

  #[test]
  fn test_bearer_header() {
    let user = User {
      id: 1,
      email: "a@b.c".to_string(),
      name: None,
      address: None,
      phone: None,
      token: Some("jwt".to_string()),
    };
    assert_eq!(bearer(&user).as_deref(), Some("Bearer jwt"));
    assert_eq!(bearer(&User { token: None, ..user }), None);
  }
}
