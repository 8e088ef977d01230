use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(pub u64);

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }
  };
}

id_type!(
  /// Identifier of a [`GraphNode`](crate::GraphNode).
  NodeId
);
id_type!(UserId);
id_type!(OrgId);
id_type!(ProjectId);

/// The three kinds of resource that own a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  Source,
  Set,
  Sink,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::Source => "source",
      ResourceKind::Set => "set",
      ResourceKind::Sink => "sink",
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "source" | "data_source" => Ok(ResourceKind::Source),
      "set" | "data_set" => Ok(ResourceKind::Set),
      "sink" | "data_sink" => Ok(ResourceKind::Sink),
      other => Err(format!("unknown resource kind '{}'", other)),
    }
  }
}

/// A typed reference to a source, set, or sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
  pub kind: ResourceKind,
  pub id: u64,
}

impl ResourceRef {
  pub fn new(kind: ResourceKind, id: u64) -> Self {
    Self { kind, id }
  }

  pub fn source(id: u64) -> Self {
    Self::new(ResourceKind::Source, id)
  }

  pub fn set(id: u64) -> Self {
    Self::new(ResourceKind::Set, id)
  }

  pub fn sink(id: u64) -> Self {
    Self::new(ResourceKind::Sink, id)
  }
}

impl fmt::Display for ResourceRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.id)
  }
}

/// Anything an access query can be asked about.
///
/// Credentials and code containers are not part of the topology; they are
/// referenced by resources and only matter for ownership transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AccessTarget {
  Resource(ResourceRef),
  Credential(u64),
  CodeContainer(u64),
  Project(ProjectId),
}

impl fmt::Display for AccessTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AccessTarget::Resource(r) => write!(f, "{}", r),
      AccessTarget::Credential(id) => write!(f, "credential:{}", id),
      AccessTarget::CodeContainer(id) => write!(f, "code_container:{}", id),
      AccessTarget::Project(id) => write!(f, "project:{}", id),
    }
  }
}
