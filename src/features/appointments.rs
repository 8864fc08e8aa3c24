//! Appointments held by the signed-in user, and reserving or freeing slots.

use std::sync::Arc;

use crate::api::{Appointment, LazyDaysApi, User};
use crate::cache::{names, QueryCache, QueryKey};
use crate::error::ErrorInfo;
use crate::mutation::Mutation;
use crate::notify::Toast;
use crate::query::{Query, QueryOptions, QuerySnapshot};
use crate::query_key;

pub const APPOINTMENT_RESERVED: &str = "You have reserved the appointment!";
pub const APPOINTMENT_REMOVED: &str = "The appointment has been removed!";

pub fn user_appointments_key(user_id: Option<u64>) -> QueryKey {
  query_key![names::APPOINTMENTS, names::USER, user_id]
}

/// Appointments of one user, re-bound whenever the user changes.
pub struct UserAppointments {
  cache: QueryCache,
  api: Arc<dyn LazyDaysApi>,
  query: Query<Option<Vec<Appointment>>>,
}

impl UserAppointments {
  pub fn new(cache: &QueryCache, api: Arc<dyn LazyDaysApi>, user: Option<User>) -> Self {
    Self {
      query: Self::bind(cache, api.clone(), user),
      cache: cache.clone(),
      api,
    }
  }

  /// Query for `user`, disabled while nobody is signed in.
  fn bind(
    cache: &QueryCache,
    api: Arc<dyn LazyDaysApi>,
    user: Option<User>,
  ) -> Query<Option<Vec<Appointment>>> {
    let key = user_appointments_key(user.as_ref().map(|user| user.id));
    let enabled = user.is_some();
    Query::new(
      cache,
      key,
      move |_| {
        let api = api.clone();
        let user = user.clone();
        async move {
          api
            .get_user_appointments(user.as_ref())
            .await
            .map_err(ErrorInfo::from)
        }
      },
      QueryOptions::default().enabled(enabled),
    )
  }

  pub fn set_user(&mut self, user: Option<User>) {
    self.query = Self::bind(&self.cache, self.api.clone(), user);
  }

  /// Appointments of the user, empty until loaded or when signed out.
  pub fn appointments(&self) -> Vec<Appointment> {
    self.query.data().flatten().unwrap_or_default()
  }

  pub fn snapshot(&self) -> QuerySnapshot<Option<Vec<Appointment>>> {
    self.query.snapshot()
  }

  pub async fn settled(&self) {
    self.query.settled().await;
  }
}

/// Appointment to assign and the user to assign it to.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
  pub appointment: Appointment,
  pub user_id: Option<u64>,
}

/// Assign an appointment to a user. Does nothing without a user.
pub fn reserve_appointment(cache: &QueryCache, api: Arc<dyn LazyDaysApi>) -> Mutation<Reservation, ()> {
  Mutation::builder("reserve appointment", cache, move |reservation: Reservation| {
    let api = api.clone();
    async move {
      api
        .set_appointment_user(&reservation.appointment, reservation.user_id)
        .await
        .map_err(ErrorInfo::from)
    }
  })
  .on_success(|cache, _, _| {
    cache.notifier().notify(Toast::success(APPOINTMENT_RESERVED));
  })
  .on_settled(|cache, _, _, _| {
    cache.invalidate(&query_key![names::APPOINTMENTS]);
  })
  .build()
}

/// Free an appointment.
pub fn cancel_appointment(cache: &QueryCache, api: Arc<dyn LazyDaysApi>) -> Mutation<Appointment, ()> {
  Mutation::builder("cancel appointment", cache, move |appointment: Appointment| {
    let api = api.clone();
    async move {
      api
        .remove_appointment_user(&appointment)
        .await
        .map_err(ErrorInfo::from)
    }
  })
  .on_success(|cache, _, _| {
    cache.notifier().notify(Toast::success(APPOINTMENT_REMOVED));
  })
  .on_settled(|cache, _, _, _| {
    cache.invalidate(&query_key![names::APPOINTMENTS]);
  })
  .build()
}
