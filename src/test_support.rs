//! In-memory gateways for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::Semaphore;

use crate::api::{
  Appointment, BlogApi, Comment, LazyDaysApi, PeoplePage, Person, Post, SwapiApi, Treatment, User,
};
use crate::cache::QueryCache;
use crate::notify::RecordingNotifier;

/// Cache wired to a notifier that records every toast.
pub fn recording_cache() -> (QueryCache, Arc<RecordingNotifier>) {
  let notifier = Arc::new(RecordingNotifier::new());
  let cache = QueryCache::default().with_notifier(notifier.clone());
  (cache, notifier)
}

pub fn user(name: &str) -> User {
  User {
    id: 1,
    email: "test@test.com".to_string(),
    name: Some(name.to_string()),
    address: None,
    phone: None,
    token: Some("jwt".to_string()),
  }
}

pub fn appointment(id: u64, user_id: Option<u64>) -> Appointment {
  Appointment {
    id,
    date_time: chrono::Utc::now(),
    treatment_name: "Massage".to_string(),
    user_id,
  }
}

/// Holds calls back while closed.
#[derive(Debug)]
pub struct Gate {
  closed: AtomicBool,
  permits: Semaphore,
}

impl Default for Gate {
  fn default() -> Self {
    Self {
      closed: AtomicBool::new(false),
      permits: Semaphore::new(0),
    }
  }
}

impl Gate {
  pub fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
  }

  /// Release every held call, and let later ones through.
  pub fn open(&self) {
    self.closed.store(false, Ordering::SeqCst);
    self.permits.add_permits(1);
  }

  async fn pass(&self) {
    if self.closed.load(Ordering::SeqCst) {
      // The permit goes back on drop, releasing the next waiter
      let _ = self.permits.acquire().await;
    }
  }
}

#[derive(Debug, Default)]
struct CallLog(Mutex<Vec<&'static str>>);

impl CallLog {
  fn record(&self, name: &'static str) {
    self.0.lock().unwrap_or_else(PoisonError::into_inner).push(name);
  }

  fn count(&self, name: &str) -> usize {
    self
      .0
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|call| **call == name)
      .count()
  }
}

/// Clinic server kept in memory.
#[derive(Debug, Default)]
pub struct FakeLazyDays {
  pub server_user: Mutex<Option<User>>,
  pub appointments: Mutex<Vec<Appointment>>,
  pub treatments: Mutex<Vec<Treatment>>,
  pub fail_writes: AtomicBool,
  pub gate: Gate,
  calls: CallLog,
}

impl FakeLazyDays {
  pub fn with_user(user: User) -> Arc<Self> {
    let fake = Self::default();
    *fake.server_user.lock().unwrap_or_else(PoisonError::into_inner) = Some(user);
    Arc::new(fake)
  }

  pub fn calls(&self, name: &str) -> usize {
    self.calls.count(name)
  }

  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn check_write(&self) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Network Error"));
    }
    Ok(())
  }

  fn update_appointment(&self, id: u64, user_id: Option<u64>) -> Result<()> {
    let mut appointments = self.appointments.lock().unwrap_or_else(PoisonError::into_inner);
    let appointment = appointments
      .iter_mut()
      .find(|a| a.id == id)
      .ok_or_else(|| eyre!("Resource not found: /appointment/{}", id))?;
    appointment.user_id = user_id;
    Ok(())
  }
}

#[async_trait]
impl LazyDaysApi for FakeLazyDays {
  async fn get_user(&self, user: Option<&User>) -> Result<Option<User>> {
    if user.is_none() {
      return Ok(None);
    }
    self.calls.record("get_user");
    self.gate.pass().await;
    Ok(
      self
        .server_user
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone(),
    )
  }

  async fn patch_user(&self, updated: Option<&User>, original: Option<&User>) -> Result<Option<User>> {
    let (Some(updated), Some(_)) = (updated, original) else {
      return Ok(None);
    };
    self.calls.record("patch_user");
    self.gate.pass().await;
    self.check_write()?;
    *self.server_user.lock().unwrap_or_else(PoisonError::into_inner) = Some(updated.clone());
    Ok(Some(updated.clone()))
  }

  async fn get_user_appointments(&self, user: Option<&User>) -> Result<Option<Vec<Appointment>>> {
    let Some(user) = user else {
      return Ok(None);
    };
    self.calls.record("get_user_appointments");
    let appointments = self.appointments.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(Some(
      appointments
        .iter()
        .filter(|a| a.user_id == Some(user.id))
        .cloned()
        .collect(),
    ))
  }

  async fn get_treatments(&self) -> Result<Vec<Treatment>> {
    self.calls.record("get_treatments");
    Ok(self.treatments.lock().unwrap_or_else(PoisonError::into_inner).clone())
  }

  async fn set_appointment_user(&self, appointment: &Appointment, user_id: Option<u64>) -> Result<()> {
    let Some(user_id) = user_id else {
      return Ok(());
    };
    self.calls.record("set_appointment_user");
    self.check_write()?;
    self.update_appointment(appointment.id, Some(user_id))
  }

  async fn remove_appointment_user(&self, appointment: &Appointment) -> Result<()> {
    self.calls.record("remove_appointment_user");
    self.check_write()?;
    self.update_appointment(appointment.id, None)
  }
}

/// Blog server with ten posts per page and three comments per post.
#[derive(Debug, Default)]
pub struct FakeBlog {
  pub fail_writes: AtomicBool,
  pub gate: Gate,
  deleted: Mutex<Vec<u64>>,
  calls: CallLog,
}

impl FakeBlog {
  pub fn calls(&self, name: &str) -> usize {
    self.calls.count(name)
  }

  pub fn deleted(&self) -> Vec<u64> {
    self.deleted.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  fn post(id: u64) -> Post {
    Post {
      user_id: 1,
      id,
      title: format!("post {}", id),
      body: "body".to_string(),
    }
  }
}

#[async_trait]
impl BlogApi for FakeBlog {
  async fn fetch_posts(&self, page: u32) -> Result<Vec<Post>> {
    self.calls.record("fetch_posts");
    self.gate.pass().await;
    let first = u64::from(page.saturating_sub(1)) * 10 + 1;
    Ok((first..first + 10).map(Self::post).collect())
  }

  async fn fetch_comments(&self, post_id: u64) -> Result<Vec<Comment>> {
    self.calls.record("fetch_comments");
    Ok(
      (1..=3)
        .map(|n| Comment {
          post_id,
          id: post_id * 10 + n,
          name: format!("comment {}", n),
          email: "reader@example.com".to_string(),
          body: "nice".to_string(),
        })
        .collect(),
    )
  }

  async fn delete_post(&self, post_id: u64) -> Result<()> {
    self.calls.record("delete_post");
    self.gate.pass().await;
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("HTTP 500 Internal Server Error: "));
    }
    self
      .deleted
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(post_id);
    Ok(())
  }

  async fn update_post(&self, post_id: u64, title: &str) -> Result<Post> {
    self.calls.record("update_post");
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("HTTP 500 Internal Server Error: "));
    }
    Ok(Post {
      title: title.to_string(),
      ..Self::post(post_id)
    })
  }
}

/// People listing served from a fixed set of pages keyed by URL.
#[derive(Debug, Default)]
pub struct FakeSwapi {
  pages: HashMap<String, PeoplePage>,
  calls: CallLog,
}

impl FakeSwapi {
  /// Two pages: three people then two, linked by `next`.
  pub fn two_pages() -> Arc<Self> {
    let person = |name: &str| Person {
      name: name.to_string(),
      hair_color: "brown".to_string(),
      eye_color: "blue".to_string(),
    };
    let mut pages = HashMap::new();
    pages.insert(
      "people/1".to_string(),
      PeoplePage {
        count: 5,
        next: Some("people/2".to_string()),
        previous: None,
        results: vec![person("Luke"), person("Leia"), person("Han")],
      },
    );
    pages.insert(
      "people/2".to_string(),
      PeoplePage {
        count: 5,
        next: Some(String::new()),
        previous: Some("people/1".to_string()),
        results: vec![person("Chewbacca"), person("Yoda")],
      },
    );
    Arc::new(Self {
      pages,
      calls: CallLog::default(),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.count("fetch_people")
  }
}

#[async_trait]
impl SwapiApi for FakeSwapi {
  async fn fetch_people(&self, url: &str) -> Result<PeoplePage> {
    self.calls.record("fetch_people");
    self
      .pages
      .get(url)
      .cloned()
      .ok_or_else(|| eyre!("Resource not found: {}", url))
  }
}
