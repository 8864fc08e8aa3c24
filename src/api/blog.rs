//! Gateway for the blog placeholder API.

use async_trait::async_trait;
use color_eyre::{eyre::Report, Result};
use serde_json::json;

use super::client::ApiClient;
use super::types::{Comment, Post};
use crate::error::ErrorInfo;

/// Posts shown per page.
pub const POSTS_PER_PAGE: u32 = 10;

#[async_trait]
pub trait BlogApi: Send + Sync {
  /// One page of posts, 1-based.
  async fn fetch_posts(&self, page: u32) -> Result<Vec<Post>>;

  async fn fetch_comments(&self, post_id: u64) -> Result<Vec<Comment>>;

  async fn delete_post(&self, post_id: u64) -> Result<()>;

  /// Change the title of a post; returns the post with the new title.
  async fn update_post(&self, post_id: u64, title: &str) -> Result<Post>;
}

/// Reject ids that cannot name a post before building a path from them.
fn post_path(post_id: u64) -> Result<String> {
  if post_id == 0 {
    return Err(Report::new(ErrorInfo::validation(
      "Post id must be a positive number",
    )));
  }
  Ok(format!("/posts/{}", post_id))
}

/// [`BlogApi`] over HTTP.
#[derive(Clone)]
pub struct HttpBlogApi {
  client: ApiClient,
}

impl HttpBlogApi {
  pub fn new(base_url: &str) -> Result<Self> {
    Ok(Self {
      client: ApiClient::new(base_url)?,
    })
  }
}

#[async_trait]
impl BlogApi for HttpBlogApi {
  async fn fetch_posts(&self, page: u32) -> Result<Vec<Post>> {
    let path = format!("/posts?_limit={}&_page={}", POSTS_PER_PAGE, page.max(1));
    self.client.get(&path, None).await
  }

  async fn fetch_comments(&self, post_id: u64) -> Result<Vec<Comment>> {
    self
      .client
      .get(&format!("/comments?postId={}", post_id), None)
      .await
  }

  async fn delete_post(&self, post_id: u64) -> Result<()> {
    self.client.delete(&post_path(post_id)?, None).await
  }

  async fn update_post(&self, post_id: u64, title: &str) -> Result<Post> {
    let path = post_path(post_id)?;
    let patch = json!({ "data": { "title": title } });
    let mut post: Post = self.client.patch(&path, &patch, None).await?;
    // The placeholder server merges the body under `data` without applying it
    post.title = title.to_string();
    Ok(post)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use httpmock::prelude::*;

  #[tokio::test]
  async fn test_fetch_posts_pages() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when
          .method(GET)
          .path("/posts")
          .query_param("_limit", "10")
          .query_param("_page", "2");
        then.status(200).json_body(json!([
          {"userId": 1, "id": 11, "title": "eleven", "body": "..."}
        ]));
      })
      .await;

    let api = HttpBlogApi::new(&server.base_url()).unwrap();
    let posts = api.fetch_posts(2).await.unwrap();

    mock.assert_async().await;
    assert_eq!(posts[0].id, 11);
  }

  #[tokio::test]
  async fn test_delete_uses_numeric_path() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(DELETE).path("/posts/3");
        then.status(200).json_body(json!({}));
      })
      .await;

    let api = HttpBlogApi::new(&server.base_url()).unwrap();
    api.delete_post(3).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_zero_post_id_is_rejected() {
    let api = HttpBlogApi::new("http://127.0.0.1:9").unwrap();
    let err = ErrorInfo::from(api.delete_post(0).await.unwrap_err());
    assert_eq!(err.kind, ErrorKind::Validation);
  }

  #[tokio::test]
  async fn test_update_post_title() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when
          .method(PATCH)
          .path("/posts/1")
          .json_body(json!({"data": {"title": "REACT QUERY FOREVER!!!!"}}));
        then.status(200).json_body(json!({
          "userId": 1, "id": 1, "title": "old", "body": "b",
          "data": {"title": "REACT QUERY FOREVER!!!!"}
        }));
      })
      .await;

    let api = HttpBlogApi::new(&server.base_url()).unwrap();
    let post = api.update_post(1, "REACT QUERY FOREVER!!!!").await.unwrap();
    assert_eq!(post.title, "REACT QUERY FOREVER!!!!");
  }
}
