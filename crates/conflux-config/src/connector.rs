use serde::{Deserialize, Serialize};

/// Broad family a connector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorCategory {
  File,
  Database,
  Api,
  Stream,
  Webhook,
}

/// Static metadata for one connector type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
  /// Connector identifier as stored on sources and sinks, e.g. "s3".
  pub connector_type: String,
  pub category: ConnectorCategory,
  /// Whether a sink of this type may feed a dependent source.
  #[serde(default)]
  pub supports_dependent_flow: bool,
}
