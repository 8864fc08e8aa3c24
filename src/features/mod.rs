//! Application features built on the query cache.
//!
//! Each module binds one backend resource to the cache with the keys,
//! freshness and side effects that resource needs.

pub mod appointments;
pub mod people;
pub mod posts;
pub mod treatments;
pub mod user;

pub use appointments::{cancel_appointment, reserve_appointment, Reservation, UserAppointments};
pub use people::People;
pub use posts::{PostDetail, Posts, MAX_POST_PAGE};
pub use treatments::{prefetch_treatments, Treatments};
pub use user::{PatchUserInput, UserStore};
