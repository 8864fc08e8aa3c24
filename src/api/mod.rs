//! Remote data gateways for the clinic, blog and people backends.

pub mod blog;
pub mod client;
pub mod lazy_days;
pub mod patch;
pub mod swapi;
pub mod types;

pub use blog::{BlogApi, HttpBlogApi, POSTS_PER_PAGE};
pub use client::{bearer, ApiClient};
pub use lazy_days::{HttpLazyDaysApi, LazyDaysApi};
pub use patch::{diff, PatchOp, PatchOperation};
pub use swapi::{HttpSwapiApi, SwapiApi};
pub use types::{Appointment, Comment, PeoplePage, Person, Post, Treatment, User};
