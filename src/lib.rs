//! Client-side query cache with optimistic mutations.
//!
//! - [`cache`]: the keyed store shared by everything else
//! - [`query`]: bindings that fetch into the cache and expose snapshots
//! - [`mutation`]: writes with optimistic updates, rollback and resync
//! - [`mirror`]: durable copy of the signed-in user
//! - [`api`]: HTTP gateways for the clinic, blog and people backends
//! - [`features`]: the application's queries and mutations

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod mirror;
pub mod mutation;
pub mod notify;
pub mod query;

#[cfg(test)]
mod test_support;

pub use cache::{CacheOptions, QueryCache, QueryKey};
pub use error::{ErrorInfo, ErrorKind};
pub use mutation::{Mutation, MutationContext, MutationStatus};
pub use query::{InfiniteQuery, Query, QueryOptions};
