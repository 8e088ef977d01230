//! Tag and doc lookups used to annotate assembled flows.

use std::collections::HashMap;
use std::sync::RwLock;

use conflux_graph::{NodeId, ResourceRef};
use serde::{Deserialize, Serialize};

/// Document linked to a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doc {
  pub id: u64,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

pub trait TagProvider: Send + Sync {
  /// Tags for a batch of resources. Resources without tags may be omitted.
  fn tags_for(&self, resources: &[ResourceRef]) -> HashMap<ResourceRef, Vec<String>>;
}

pub trait DocProvider: Send + Sync {
  fn docs_for(&self, origin_node_id: NodeId) -> Vec<Doc>;
}

#[derive(Debug, Default)]
pub struct InMemoryTags {
  tags: RwLock<HashMap<ResourceRef, Vec<String>>>,
}

impl InMemoryTags {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn tag(&self, resource: ResourceRef, tag: impl Into<String>) {
    if let Ok(mut tags) = self.tags.write() {
      tags.entry(resource).or_default().push(tag.into());
    }
  }
}

impl TagProvider for InMemoryTags {
  fn tags_for(&self, resources: &[ResourceRef]) -> HashMap<ResourceRef, Vec<String>> {
    let Ok(tags) = self.tags.read() else {
      return HashMap::new();
    };
    resources
      .iter()
      .filter_map(|r| tags.get(r).map(|t| (*r, t.clone())))
      .collect()
  }
}

#[derive(Debug, Default)]
pub struct InMemoryDocs {
  docs: RwLock<HashMap<NodeId, Vec<Doc>>>,
}

impl InMemoryDocs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn link(&self, origin_node_id: NodeId, doc: Doc) {
    if let Ok(mut docs) = self.docs.write() {
      docs.entry(origin_node_id).or_default().push(doc);
    }
  }
}

impl DocProvider for InMemoryDocs {
  fn docs_for(&self, origin_node_id: NodeId) -> Vec<Doc> {
    self
      .docs
      .read()
      .ok()
      .and_then(|docs| docs.get(&origin_node_id).cloned())
      .unwrap_or_default()
  }
}
