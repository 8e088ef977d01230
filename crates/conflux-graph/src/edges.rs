use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, OrgId, ProjectId, UserId};

/// Event on the triggering flow that fires a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeringEvent {
  DataSourceReadStart,
  DataSourceReadDone,
  DataSinkWriteDone,
}

/// Action taken on the triggered flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredEvent {
  DataSourceRead,
  DataSinkWrite,
}

/// Scheduling dependency between two flows, keyed by their origin nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEdge {
  pub id: u64,
  pub owner_id: UserId,
  pub org_id: OrgId,
  pub triggering_origin_node_id: NodeId,
  pub triggered_origin_node_id: NodeId,
  pub triggering_event: TriggeringEvent,
  pub triggered_event: TriggeredEvent,
}

impl TriggerEdge {
  pub fn involves(&self, node_id: NodeId) -> bool {
    self.triggering_origin_node_id == node_id || self.triggered_origin_node_id == node_id
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
  /// Undirected relation; endpoints are stored in ascending order.
  Peer,
  /// Directed relation from `left` to `right`.
  Retrieval,
}

impl LinkType {
  pub fn is_symmetric(&self) -> bool {
    matches!(self, LinkType::Peer)
  }
}

/// Edge between two flow origins, optionally scoped to one retrieval source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLink {
  pub id: u64,
  pub link_type: LinkType,
  pub left_origin_node_id: NodeId,
  pub right_origin_node_id: NodeId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retriever_data_source_id: Option<u64>,
}

impl FlowLink {
  pub fn involves(&self, node_id: NodeId) -> bool {
    self.left_origin_node_id == node_id || self.right_origin_node_id == node_id
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub id: ProjectId,
  pub name: String,
  pub owner_id: UserId,
  pub org_id: OrgId,
}
