use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::connector::ConnectorSpec;
use crate::error::ConfigError;

/// Process-wide configuration for the topology engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Maximum number of routing rules on a splitter (fallback excluded).
  pub max_splitter_rules: usize,

  /// Name of the transform operation that marks a set as a splitter
  /// when it is the leading operation.
  pub splitter_operation: String,

  /// Sample field carrying the destination set id assigned by the splitter.
  pub routing_tag_field: String,

  /// Sink config keys that point at a dependent source.
  pub dependent_source_keys: Vec<String>,

  /// Suffix appended to resource names on copy.
  pub copy_name_suffix: String,

  /// Connector metadata.
  pub connectors: Vec<ConnectorSpec>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_splitter_rules: 5,
      splitter_operation: "splitter".to_string(),
      routing_tag_field: "_route".to_string(),
      dependent_source_keys: vec![
        "data_source_id".to_string(),
        "dependent_data_source_id".to_string(),
      ],
      copy_name_suffix: " (copy)".to_string(),
      connectors: Vec::new(),
    }
  }
}

impl EngineConfig {
  /// Parse and validate a JSON config document.
  pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
    let config: EngineConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Load and validate a JSON config file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_json_str(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_splitter_rules == 0 {
      return Err(ConfigError::Invalid(
        "max_splitter_rules must be at least 1".to_string(),
      ));
    }
    if self.splitter_operation.trim().is_empty() {
      return Err(ConfigError::Invalid(
        "splitter_operation must not be empty".to_string(),
      ));
    }
    if self.routing_tag_field.trim().is_empty() {
      return Err(ConfigError::Invalid(
        "routing_tag_field must not be empty".to_string(),
      ));
    }

    let mut seen = HashSet::new();
    for connector in &self.connectors {
      if !seen.insert(connector.connector_type.as_str()) {
        return Err(ConfigError::Invalid(format!(
          "duplicate connector type '{}'",
          connector.connector_type
        )));
      }
    }

    Ok(())
  }

  /// Look up connector metadata by type.
  pub fn connector(&self, connector_type: &str) -> Option<&ConnectorSpec> {
    self
      .connectors
      .iter()
      .find(|c| c.connector_type == connector_type)
  }
}
