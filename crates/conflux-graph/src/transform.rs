//! Transform and splitter rule types.
//!
//! A transform is an ordered list of operations. When the leading operation is
//! the configured splitter instruction, its `spec` holds a [`SplitterSpec`]:
//!
//! ```json
//! {
//!   "operation": "splitter",
//!   "spec": {
//!     "rules": [
//!       { "name": "eu", "condition": { "region": "eu" }, "destination": { "data_set_id": 10 } },
//!       { "name": "us", "condition": { "region": "us" }, "destination": { "name": "US orders" } }
//!     ],
//!     "fallback": { "action": "discard" }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
  #[serde(default)]
  pub operations: Vec<TransformOperation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOperation {
  pub operation: String,
  #[serde(default)]
  pub spec: serde_json::Value,
}

/// Where a routing rule sends its records.
///
/// A destination with no `data_set_id` asks for a new branch set; the created
/// id is written back once the branch exists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Destination {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data_set_id: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitterRule {
  pub name: String,
  #[serde(default)]
  pub condition: serde_json::Value,
  #[serde(default)]
  pub destination: Destination,
}

/// What happens to records no rule matches. Absent means discard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Fallback {
  #[default]
  Discard,
  DataSet(Destination),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SplitterSpec {
  #[serde(default)]
  pub rules: Vec<SplitterRule>,
  #[serde(default)]
  pub fallback: Fallback,
}

impl SplitterSpec {
  /// All destinations, rules first, then the fallback if it routes to a set.
  pub fn destinations(&self) -> Vec<&Destination> {
    let mut destinations: Vec<&Destination> = self.rules.iter().map(|r| &r.destination).collect();
    if let Fallback::DataSet(destination) = &self.fallback {
      destinations.push(destination);
    }
    destinations
  }

  pub fn destinations_mut(&mut self) -> Vec<&mut Destination> {
    let mut destinations: Vec<&mut Destination> =
      self.rules.iter_mut().map(|r| &mut r.destination).collect();
    if let Fallback::DataSet(destination) = &mut self.fallback {
      destinations.push(destination);
    }
    destinations
  }

  /// Existing set ids referenced by rules or the fallback.
  pub fn referenced_ids(&self) -> Vec<u64> {
    self
      .destinations()
      .into_iter()
      .filter_map(|d| d.data_set_id)
      .collect()
  }
}

impl Transform {
  pub fn leading_operation(&self) -> Option<&TransformOperation> {
    self.operations.first()
  }

  pub fn is_splitter(&self, splitter_operation: &str) -> bool {
    self
      .leading_operation()
      .is_some_and(|op| op.operation == splitter_operation)
  }

  /// Parse the splitter spec, if the leading operation is the splitter.
  pub fn splitter_spec(
    &self,
    splitter_operation: &str,
  ) -> Result<Option<SplitterSpec>, GraphError> {
    match self.leading_operation() {
      Some(op) if op.operation == splitter_operation => {
        let spec = if op.spec.is_null() {
          SplitterSpec::default()
        } else {
          serde_json::from_value(op.spec.clone())
            .map_err(|e| GraphError::bad_request(format!("invalid splitter spec: {}", e)))?
        };
        Ok(Some(spec))
      }
      _ => Ok(None),
    }
  }

  /// Replace the leading operation's spec with `spec`.
  pub fn set_splitter_spec(&mut self, spec: &SplitterSpec) -> Result<(), GraphError> {
    let op = self
      .operations
      .first_mut()
      .ok_or_else(|| GraphError::bad_request("transform has no operations"))?;
    op.spec = serde_json::to_value(spec)
      .map_err(|e| GraphError::bad_request(format!("invalid splitter spec: {}", e)))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn splitter_transform(spec: serde_json::Value) -> Transform {
    Transform {
      operations: vec![
        TransformOperation {
          operation: "splitter".to_string(),
          spec,
        },
        TransformOperation {
          operation: "rename".to_string(),
          spec: json!({}),
        },
      ],
    }
  }

  #[test]
  fn test_splitter_detection_uses_leading_operation() {
    let transform = splitter_transform(json!({}));
    assert!(transform.is_splitter("splitter"));

    let mut reordered = transform.clone();
    reordered.operations.reverse();
    assert!(!reordered.is_splitter("splitter"));
    assert_eq!(reordered.splitter_spec("splitter").unwrap(), None);
  }

  #[test]
  fn test_missing_fallback_means_discard() {
    let transform = splitter_transform(json!({
      "rules": [{ "name": "a", "destination": { "data_set_id": 10 } }]
    }));
    let spec = transform.splitter_spec("splitter").unwrap().unwrap();
    assert_eq!(spec.fallback, Fallback::Discard);
    assert_eq!(spec.referenced_ids(), vec![10]);
  }

  #[test]
  fn test_fallback_destination_is_referenced() {
    let transform = splitter_transform(json!({
      "rules": [{ "name": "a", "destination": { "name": "New" } }],
      "fallback": { "action": "data_set", "data_set_id": 11 }
    }));
    let spec = transform.splitter_spec("splitter").unwrap().unwrap();
    assert_eq!(spec.referenced_ids(), vec![11]);
    assert_eq!(spec.destinations().len(), 2);
  }

  #[test]
  fn test_invalid_spec_is_bad_request() {
    let transform = splitter_transform(json!({ "rules": "nope" }));
    let err = transform.splitter_spec("splitter").unwrap_err();
    assert!(matches!(err, GraphError::BadRequest { .. }));
  }

  #[test]
  fn test_write_back_spec() {
    let mut transform = splitter_transform(json!({
      "rules": [{ "name": "a", "destination": { "name": "New" } }]
    }));
    let mut spec = transform.splitter_spec("splitter").unwrap().unwrap();
    for destination in spec.destinations_mut() {
      destination.data_set_id = Some(42);
    }
    transform.set_splitter_spec(&spec).unwrap();

    let reparsed = transform.splitter_spec("splitter").unwrap().unwrap();
    assert_eq!(reparsed.referenced_ids(), vec![42]);
    assert_eq!(reparsed.rules[0].destination.name.as_deref(), Some("New"));
  }
}
