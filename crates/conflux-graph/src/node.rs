use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, OrgId, ProjectId, ResourceRef, UserId};

/// Lifecycle status shared by resources and their graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
  #[default]
  Init,
  Active,
  Paused,
}

impl ResourceStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceStatus::Init => "init",
      ResourceStatus::Active => "active",
      ResourceStatus::Paused => "paused",
    }
  }
}

/// One topology node per resource.
///
/// `origin_node_id` always resolves; on a root it points at the node itself.
/// A node with `shared_origin_node_id` set was derived across a sharing
/// boundary: it roots its own origin chain and remembers the foreign origin
/// it descended from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
  pub id: NodeId,
  pub owner_id: UserId,
  pub org_id: OrgId,
  pub resource: ResourceRef,
  pub parent_node_id: Option<NodeId>,
  pub origin_node_id: NodeId,
  pub shared_origin_node_id: Option<NodeId>,
  pub status: ResourceStatus,
  pub project_id: Option<ProjectId>,
}

impl GraphNode {
  /// Whether this node is the origin of its flow.
  pub fn is_origin(&self) -> bool {
    self.origin_node_id == self.id
  }
}
