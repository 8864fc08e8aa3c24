//! One-shot user-visible notifications (success/warning/error toasts).

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastStatus {
  Info,
  Success,
  Warning,
  Error,
}

/// A notification raised by a query or mutation lifecycle callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
  pub title: String,
  pub status: ToastStatus,
  pub raised_at: DateTime<Utc>,
}

impl Toast {
  pub fn new(title: impl Into<String>, status: ToastStatus) -> Self {
    Self {
      title: title.into(),
      status,
      raised_at: Utc::now(),
    }
  }

  pub fn success(title: impl Into<String>) -> Self {
    Self::new(title, ToastStatus::Success)
  }

  pub fn warning(title: impl Into<String>) -> Self {
    Self::new(title, ToastStatus::Warning)
  }

  pub fn error(title: impl Into<String>) -> Self {
    Self::new(title, ToastStatus::Error)
  }
}

/// Sink for notifications. The presentation layer decides how to show them.
pub trait Notifier: Send + Sync {
  fn notify(&self, toast: Toast);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, toast: Toast) {
    log_toast(&toast);
  }
}

/// Notifier that logs and keeps every toast until drained.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  toasts: Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take all recorded toasts, oldest first.
  pub fn drain(&self) -> Vec<Toast> {
    let mut toasts = self.toasts.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::take(&mut *toasts)
  }

  /// Copy of the recorded toasts without draining them.
  pub fn toasts(&self) -> Vec<Toast> {
    self
      .toasts
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, toast: Toast) {
    log_toast(&toast);
    self
      .toasts
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(toast);
  }
}

fn log_toast(toast: &Toast) {
  match toast.status {
    ToastStatus::Info | ToastStatus::Success => info!(title = %toast.title, "notification"),
    ToastStatus::Warning => warn!(title = %toast.title, "notification"),
    ToastStatus::Error => error!(title = %toast.title, "notification"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_recording_notifier_drains_in_order() {
    let notifier = RecordingNotifier::new();
    notifier.notify(Toast::success("first"));
    notifier.notify(Toast::warning("second"));

    let drained = notifier.drain();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].title, "first");
    assert_eq!(drained[1].status, ToastStatus::Warning);
    assert!(notifier.toasts().is_empty());
  }
}
