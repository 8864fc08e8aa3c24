//! Gateway for the clinic (lazy-days) server.

use async_trait::async_trait;
use color_eyre::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::client::{bearer, ApiClient};
use super::patch::{diff, PatchOperation};
use super::types::{Appointment, Treatment, User};

/// Remote operations used by the clinic features.
///
/// Calls that need a user short-circuit with `Ok(None)` / `Ok(())` when none
/// is given, without touching the network.
#[async_trait]
pub trait LazyDaysApi: Send + Sync {
  /// Re-read `user` from the server.
  async fn get_user(&self, user: Option<&User>) -> Result<Option<User>>;

  /// Send the difference between `original` and `updated`; returns the
  /// server's copy of the user.
  async fn patch_user(&self, updated: Option<&User>, original: Option<&User>)
    -> Result<Option<User>>;

  async fn get_user_appointments(&self, user: Option<&User>) -> Result<Option<Vec<Appointment>>>;

  async fn get_treatments(&self) -> Result<Vec<Treatment>>;

  /// Assign `appointment` to `user_id`.
  async fn set_appointment_user(&self, appointment: &Appointment, user_id: Option<u64>)
    -> Result<()>;

  /// Free `appointment`.
  async fn remove_appointment_user(&self, appointment: &Appointment) -> Result<()>;
}

/// Operations assigning an appointment: `replace` when it already has a user.
pub fn reserve_operations(appointment: &Appointment, user_id: u64) -> Vec<PatchOperation> {
  let value = json!(user_id);
  let op = if appointment.user_id.is_some() {
    PatchOperation::replace("/userId", value)
  } else {
    PatchOperation::add("/userId", value)
  };
  vec![op]
}

#[derive(Deserialize)]
struct UserEnvelope {
  user: User,
}

#[derive(Deserialize)]
struct AppointmentsEnvelope {
  appointments: Vec<Appointment>,
}

/// [`LazyDaysApi`] over HTTP.
#[derive(Clone)]
pub struct HttpLazyDaysApi {
  client: ApiClient,
}

impl HttpLazyDaysApi {
  pub fn new(base_url: &str) -> Result<Self> {
    Ok(Self {
      client: ApiClient::new(base_url)?,
    })
  }
}

#[async_trait]
impl LazyDaysApi for HttpLazyDaysApi {
  async fn get_user(&self, user: Option<&User>) -> Result<Option<User>> {
    let Some(user) = user else {
      return Ok(None);
    };

    let envelope: UserEnvelope = self
      .client
      .get(&format!("/user/{}", user.id), bearer(user).as_deref())
      .await?;
    Ok(Some(envelope.user))
  }

  async fn patch_user(
    &self,
    updated: Option<&User>,
    original: Option<&User>,
  ) -> Result<Option<User>> {
    let (Some(updated), Some(original)) = (updated, original) else {
      return Ok(None);
    };

    let patch = diff(&serde_json::to_value(original)?, &serde_json::to_value(updated)?);
    debug!(user = original.id, ops = patch.len(), "patching user");

    let envelope: UserEnvelope = self
      .client
      .patch(
        &format!("/user/{}", original.id),
        &json!({ "patch": patch }),
        bearer(original).as_deref(),
      )
      .await?;
    Ok(Some(envelope.user))
  }

  async fn get_user_appointments(&self, user: Option<&User>) -> Result<Option<Vec<Appointment>>> {
    let Some(user) = user else {
      return Ok(None);
    };

    let envelope: AppointmentsEnvelope = self
      .client
      .get(
        &format!("/user/{}/appointments", user.id),
        bearer(user).as_deref(),
      )
      .await?;
    Ok(Some(envelope.appointments))
  }

  async fn get_treatments(&self) -> Result<Vec<Treatment>> {
    self.client.get("/treatments", None).await
  }

  async fn set_appointment_user(
    &self,
    appointment: &Appointment,
    user_id: Option<u64>,
  ) -> Result<()> {
    let Some(user_id) = user_id else {
      return Ok(());
    };

    let patch = reserve_operations(appointment, user_id);
    let _: Value = self
      .client
      .patch(
        &format!("/appointment/{}", appointment.id),
        &json!({ "data": patch }),
        None,
      )
      .await?;
    Ok(())
  }

  async fn remove_appointment_user(&self, appointment: &Appointment) -> Result<()> {
    let patch = vec![PatchOperation::remove("/userId")];
    let _: Value = self
      .client
      .patch(
        &format!("/appointment/{}", appointment.id),
        &json!({ "data": patch }),
        None,
      )
      .await?;
    Ok(())
  }
}
