//! Paginated blog posts and the detail view of one post.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::api::{BlogApi, Comment, Post};
use crate::cache::{fetcher, names, QueryCache, QueryContext, QueryKey};
use crate::error::ErrorInfo;
use crate::mutation::{Mutation, MutationSnapshot};
use crate::query::{Query, QueryOptions, QuerySnapshot};
use crate::query_key;

pub const MAX_POST_PAGE: u32 = 10;
pub const POSTS_STALE_TIME: Duration = Duration::from_secs(2);

pub fn posts_key(page: u32) -> QueryKey {
  query_key![names::POSTS, page]
}

pub fn comments_key(post_id: u64) -> QueryKey {
  query_key![names::COMMENTS, post_id]
}

fn page_of(ctx: &QueryContext) -> u32 {
  ctx
    .key
    .int_at(1)
    .and_then(|page| u32::try_from(page).ok())
    .unwrap_or(1)
}

/// Posts listing that keeps the current page visible while the next loads
/// and prefetches the page after the current one.
pub struct Posts {
  cache: QueryCache,
  api: Arc<dyn BlogApi>,
  page: u32,
  query: Query<Vec<Post>>,
}

impl Posts {
  pub fn new(cache: &QueryCache, api: Arc<dyn BlogApi>, page: u32) -> Self {
    let page = page.clamp(1, MAX_POST_PAGE);
    let fetch_api = api.clone();
    let query = Query::new(
      cache,
      posts_key(page),
      move |ctx: QueryContext| {
        let api = fetch_api.clone();
        let page = page_of(&ctx);
        async move { api.fetch_posts(page).await.map_err(ErrorInfo::from) }
      },
      QueryOptions::default()
        .stale_time(POSTS_STALE_TIME)
        .keep_previous_data(true),
    );

    let posts = Self {
      cache: cache.clone(),
      api,
      page,
      query,
    };
    posts.prefetch_next();
    posts
  }

  pub fn page(&self) -> u32 {
    self.page
  }

  pub fn has_previous(&self) -> bool {
    self.page > 1
  }

  pub fn has_next(&self) -> bool {
    self.page < MAX_POST_PAGE
  }

  /// Move to `page`, bounded to the valid range.
  pub fn set_page(&mut self, page: u32) {
    let page = page.clamp(1, MAX_POST_PAGE);
    if page == self.page {
      return;
    }
    debug!(from = self.page, to = page, "posts page changed");
    self.page = page;
    self.query.set_key(posts_key(page));
    self.prefetch_next();
  }

  pub fn next_page(&mut self) {
    if self.has_next() {
      self.set_page(self.page + 1);
    }
  }

  pub fn previous_page(&mut self) {
    if self.has_previous() {
      self.set_page(self.page - 1);
    }
  }

  fn prefetch_next(&self) {
    if !self.has_next() {
      return;
    }
    let next = self.page + 1;
    let api = self.api.clone();
    self.cache.prefetch(
      &posts_key(next),
      fetcher(move |_| {
        let api = api.clone();
        async move { api.fetch_posts(next).await.map_err(ErrorInfo::from) }
      }),
    );
  }

  pub fn snapshot(&self) -> QuerySnapshot<Vec<Post>> {
    self.query.snapshot()
  }

  pub fn query(&mut self) -> &mut Query<Vec<Post>> {
    &mut self.query
  }
}

pub const UPDATED_TITLE: &str = "REACT QUERY FOREVER!!!!";

/// Comments of one post plus delete and retitle actions for it.
pub struct PostDetail {
  post: Post,
  comments: Query<Vec<Comment>>,
  delete: Mutation<u64, ()>,
  update: Mutation<u64, Post>,
}

impl PostDetail {
  pub fn new(cache: &QueryCache, api: Arc<dyn BlogApi>, post: Post) -> Self {
    let post_id = post.id;
    let comments_api = api.clone();
    let comments = Query::new(
      cache,
      comments_key(post_id),
      move |_| {
        let api = comments_api.clone();
        async move { api.fetch_comments(post_id).await.map_err(ErrorInfo::from) }
      },
      QueryOptions::default(),
    );

    let delete_api = api.clone();
    let delete = Mutation::builder("delete post", cache, move |post_id: u64| {
      let api = delete_api.clone();
      async move { api.delete_post(post_id).await.map_err(ErrorInfo::from) }
    })
    .on_settled(|cache, _, _, _| {
      cache.invalidate(&query_key![names::POSTS]);
    })
    .build();

    let update = Mutation::builder("update post", cache, move |post_id: u64| {
      let api = api.clone();
      async move {
        api
          .update_post(post_id, UPDATED_TITLE)
          .await
          .map_err(ErrorInfo::from)
      }
    })
    .on_settled(|cache, _, _, _| {
      cache.invalidate(&query_key![names::POSTS]);
    })
    .build();

    Self {
      post,
      comments,
      delete,
      update,
    }
  }

  pub fn post(&self) -> &Post {
    &self.post
  }

  pub fn comments(&self) -> QuerySnapshot<Vec<Comment>> {
    self.comments.snapshot()
  }

  pub async fn settled(&self) {
    self.comments.settled().await;
  }

  pub async fn delete(&self) -> Result<(), ErrorInfo> {
    self.delete.mutate_async(self.post.id).await
  }

  pub async fn update_title(&self) -> Result<Post, ErrorInfo> {
    self.update.mutate_async(self.post.id).await
  }

  pub fn delete_status(&self) -> MutationSnapshot<()> {
    self.delete.snapshot()
  }

  pub fn update_status(&self) -> MutationSnapshot<Post> {
    self.update.snapshot()
  }
}
