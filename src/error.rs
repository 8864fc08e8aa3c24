//! Error information recorded by the cache and surfaced to consumers.
//!
//! Gateway code works with `color_eyre::Result`; anything that ends up in a
//! cache entry or a mutation snapshot is flattened into an [`ErrorInfo`], which
//! is cheap to clone and can be shared between every waiter of a fetch.

use thiserror::Error;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Network failure or non-2xx response
  Transport,
  /// Input rejected before reaching the network
  Validation,
  /// The fetch was cancelled before it produced a result
  Cancelled,
}

/// A failure attached to a query or mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ErrorInfo {
  pub kind: ErrorKind,
  pub message: String,
}

impl ErrorInfo {
  pub fn transport(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Transport,
      message: message.into(),
    }
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Validation,
      message: message.into(),
    }
  }

  pub fn cancelled() -> Self {
    Self {
      kind: ErrorKind::Cancelled,
      message: "Query was cancelled".to_string(),
    }
  }

  pub fn is_cancelled(&self) -> bool {
    self.kind == ErrorKind::Cancelled
  }

  /// Title used for the notification raised by the global error handler.
  pub fn notification_title(&self) -> String {
    if self.message.trim().is_empty() {
      "error connecting to server".to_string()
    } else {
      self.message.clone()
    }
  }
}

impl From<color_eyre::Report> for ErrorInfo {
  fn from(report: color_eyre::Report) -> Self {
    match report.downcast_ref::<ErrorInfo>() {
      Some(info) => info.clone(),
      None => ErrorInfo::transport(report.to_string()),
    }
  }
}

impl From<serde_json::Error> for ErrorInfo {
  fn from(err: serde_json::Error) -> Self {
    ErrorInfo::transport(format!("Failed to decode payload: {}", err))
  }
}
