//! JSON-Patch style operation lists.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
  Add,
  Remove,
  Replace,
}

/// One `{op, path, value}` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
  pub op: PatchOp,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<Value>,
}

impl PatchOperation {
  pub fn add(path: impl Into<String>, value: Value) -> Self {
    Self {
      op: PatchOp::Add,
      path: path.into(),
      value: Some(value),
    }
  }

  pub fn replace(path: impl Into<String>, value: Value) -> Self {
    Self {
      op: PatchOp::Replace,
      path: path.into(),
      value: Some(value),
    }
  }

  pub fn remove(path: impl Into<String>) -> Self {
    Self {
      op: PatchOp::Remove,
      path: path.into(),
      value: None,
    }
  }
}

/// Operations turning `original` into `updated`.
///
/// Objects are compared member by member; any other differing value
/// (arrays included) is replaced whole.
pub fn diff(original: &Value, updated: &Value) -> Vec<PatchOperation> {
  let mut ops = Vec::new();
  diff_at("", original, updated, &mut ops);
  ops
}

fn diff_at(path: &str, original: &Value, updated: &Value, ops: &mut Vec<PatchOperation>) {
  match (original, updated) {
    (Value::Object(before), Value::Object(after)) => diff_objects(path, before, after, ops),
    _ if original != updated => ops.push(PatchOperation::replace(path, updated.clone())),
    _ => {}
  }
}

fn diff_objects(
  path: &str,
  before: &Map<String, Value>,
  after: &Map<String, Value>,
  ops: &mut Vec<PatchOperation>,
) {
  for (name, old) in before {
    let member = format!("{}/{}", path, escape(name));
    match after.get(name) {
      Some(new) => diff_at(&member, old, new, ops),
      None => ops.push(PatchOperation::remove(member)),
    }
  }

  for (name, new) in after {
    if !before.contains_key(name) {
      ops.push(PatchOperation::add(
        format!("{}/{}", path, escape(name)),
        new.clone(),
      ));
    }
  }
}

/// Escape a member name as a JSON Pointer reference token.
fn escape(name: &str) -> String {
  name.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_diff_scalar_members() {
    let ops = diff(
      &json!({"id": 1, "name": "A", "phone": "555"}),
      &json!({"id": 1, "name": "B", "address": "Main St"}),
    );

    assert_eq!(
      ops,
      vec![
        PatchOperation::replace("/name", json!("B")),
        PatchOperation::remove("/phone"),
        PatchOperation::add("/address", json!("Main St")),
      ]
    );
  }

  #[test]
  fn test_diff_nested_and_escaped() {
    let ops = diff(
      &json!({"a/b": {"x": 1}, "list": [1, 2]}),
      &json!({"a/b": {"x": 2}, "list": [1, 2, 3]}),
    );

    assert_eq!(
      ops,
      vec![
        PatchOperation::replace("/a~1b/x", json!(2)),
        PatchOperation::replace("/list", json!([1, 2, 3])),
      ]
    );
  }

  #[test]
  fn test_identical_values_produce_no_ops() {
    let user = json!({"id": 1, "email": "a@b.c"});
    assert!(diff(&user, &user).is_empty());
  }

  #[test]
  fn test_wire_format() {
    let value = serde_json::to_value(vec![
      PatchOperation::add("/userId", json!(7)),
      PatchOperation::remove("/userId"),
    ])
    .unwrap();
    assert_eq!(
      value,
      json!([
        {"op": "add", "path": "/userId", "value": 7},
        {"op": "remove", "path": "/userId"},
      ])
    );
  }
}
