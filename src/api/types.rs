use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signed-in clinic user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub address: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  /// JWT issued at login
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub token: Option<String>,
}

/// Bookable appointment slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
  pub id: u64,
  pub date_time: DateTime<Utc>,
  pub treatment_name: String,
  /// Id of the user holding the slot, absent when free
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<u64>,
}

/// Treatment offered by the clinic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
  pub id: u64,
  pub name: String,
  pub duration_in_minutes: u32,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
}

/// Blog post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
  pub user_id: u64,
  pub id: u64,
  pub title: String,
  pub body: String,
}

/// Comment on a blog post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
  pub post_id: u64,
  pub id: u64,
  pub name: String,
  pub email: String,
  pub body: String,
}

/// Star Wars character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
  pub name: String,
  #[serde(default)]
  pub hair_color: String,
  #[serde(default)]
  pub eye_color: String,
}

/// One page of the people listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeoplePage {
  #[serde(default)]
  pub count: u64,
  /// URL of the following page; null or empty on the last page
  pub next: Option<String>,
  pub previous: Option<String>,
  pub results: Vec<Person>,
}

impl PeoplePage {
  /// URL of the following page, treating an empty string as none.
  pub fn next_url(&self) -> Option<String> {
    self.next.clone().filter(|url| !url.is_empty())
  }
}
