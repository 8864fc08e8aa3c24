//! Structural query keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known first segments shared by the feature modules.
pub mod names {
  pub const USER: &str = "user";
  pub const APPOINTMENTS: &str = "appointments";
  pub const TREATMENTS: &str = "treatments";
  pub const POSTS: &str = "posts";
  pub const COMMENTS: &str = "comments";
  pub const PEOPLE: &str = "sw-people";
}

/// One primitive identifier inside a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
  Null,
  Bool(bool),
  Int(i64),
  Str(String),
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeySegment::Null => write!(f, "null"),
      KeySegment::Bool(b) => write!(f, "{}", b),
      KeySegment::Int(i) => write!(f, "{}", i),
      KeySegment::Str(s) => write!(f, "{:?}", s),
    }
  }
}

impl From<&str> for KeySegment {
  fn from(value: &str) -> Self {
    KeySegment::Str(value.to_string())
  }
}

impl From<String> for KeySegment {
  fn from(value: String) -> Self {
    KeySegment::Str(value)
  }
}

impl From<bool> for KeySegment {
  fn from(value: bool) -> Self {
    KeySegment::Bool(value)
  }
}

macro_rules! int_segment {
  ($($t:ty),*) => {
    $(
      impl From<$t> for KeySegment {
        fn from(value: $t) -> Self {
          KeySegment::Int(i64::from(value))
        }
      }
    )*
  };
}

int_segment!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for KeySegment {
  fn from(value: u64) -> Self {
    match i64::try_from(value) {
      Ok(v) => KeySegment::Int(v),
      Err(_) => KeySegment::Str(value.to_string()),
    }
  }
}

impl<T: Into<KeySegment>> From<Option<T>> for KeySegment {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(KeySegment::Null)
  }
}

/// Ordered tuple of identifiers naming a cacheable query.
///
/// Equality is structural: two keys built separately from the same segments
/// address the same cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
  pub fn new(segments: Vec<KeySegment>) -> Self {
    Self(segments)
  }

  pub fn segments(&self) -> &[KeySegment] {
    &self.0
  }

  pub fn segment(&self, index: usize) -> Option<&KeySegment> {
    self.0.get(index)
  }

  /// Integer segment at `index`, if there is one.
  pub fn int_at(&self, index: usize) -> Option<i64> {
    match self.0.get(index) {
      Some(KeySegment::Int(i)) => Some(*i),
      _ => None,
    }
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// True when `prefix` matches the leading segments of this key.
  /// The empty key is a prefix of every key.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// A new key with `segment` appended.
  pub fn child(&self, segment: impl Into<KeySegment>) -> Self {
    let mut segments = self.0.clone();
    segments.push(segment.into());
    Self(segments)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ",")?;
      }
      write!(f, "{}", segment)?;
    }
    write!(f, "]")
  }
}

/// Build a [`QueryKey`] from anything convertible into key segments.
///
/// ```
/// use lazyq::query_key;
/// let key = query_key!["appointments", "user", 42];
/// assert_eq!(key.to_string(), r#"["appointments","user",42]"#);
/// ```
#[macro_export]
macro_rules! query_key {
  () => {
    $crate::cache::QueryKey::default()
  };
  ($($segment:expr),+ $(,)?) => {
    $crate::cache::QueryKey::new(vec![$($crate::cache::KeySegment::from($segment)),+])
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_structural_equality() {
    let a = query_key!["appointments", "user", 42];
    let b = QueryKey::new(vec!["appointments".into(), "user".into(), 42u64.into()]);
    assert_eq!(a, b);
    assert_ne!(a, query_key!["appointments", "user", "42"]);
  }

  #[test]
  fn test_prefix_matching() {
    let key = query_key!["appointments", "user", 42];
    assert!(key.starts_with(&query_key!["appointments"]));
    assert!(key.starts_with(&query_key!["appointments", "user"]));
    assert!(key.starts_with(&query_key![]));
    assert!(!key.starts_with(&query_key!["user"]));
    assert!(!query_key!["posts"].starts_with(&query_key!["posts", 1]));
  }

  #[test]
  fn test_optional_segment_and_display() {
    let none: Option<u32> = None;
    let key = query_key!["appointments", "user", none];
    assert_eq!(key.to_string(), r#"["appointments","user",null]"#);
    assert_eq!(query_key!["posts", 3].int_at(1), Some(3));
  }

  #[test]
  fn test_serializes_as_json_array() {
    let key = query_key!["posts", 2, true];
    assert_eq!(
      serde_json::to_string(&key).unwrap(),
      r#"["posts",2,true]"#
    );
  }
}
