//! Row types and conversions between rows and graph values.

use conflux_graph::{
  FlowLink, GraphNode, NodeId, OrgId, Project, ProjectId, Resource, ResourceKind, ResourceRef,
  ResourceStatus, TriggerEdge, UserId,
};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::Error;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ResourceRow {
  pub kind: String,
  pub id: i64,
  pub body: Json<Resource>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct NodeRow {
  pub id: i64,
  pub owner_id: i64,
  pub org_id: i64,
  pub resource_kind: String,
  pub resource_id: i64,
  pub parent_node_id: Option<i64>,
  pub origin_node_id: i64,
  pub shared_origin_node_id: Option<i64>,
  pub status: String,
  pub project_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ProjectRow {
  pub id: i64,
  pub name: String,
  pub owner_id: i64,
  pub org_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TriggerRow {
  pub body: Json<TriggerEdge>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct LinkRow {
  pub body: Json<FlowLink>,
}

// SQLite integers are signed; ids never exceed i64::MAX in practice.
pub(crate) fn to_db(id: u64) -> i64 {
  id as i64
}

pub(crate) fn from_db(id: i64) -> u64 {
  id as u64
}

fn parse_status(s: &str) -> Result<ResourceStatus, Error> {
  match s {
    "init" => Ok(ResourceStatus::Init),
    "active" => Ok(ResourceStatus::Active),
    "paused" => Ok(ResourceStatus::Paused),
    other => Err(Error::Corrupt(format!("unknown status '{}'", other))),
  }
}

impl ResourceRow {
  pub(crate) fn into_resource(self) -> Result<Resource, Error> {
    let resource = self.body.0;
    let kind: ResourceKind = self.kind.parse().map_err(Error::Corrupt)?;
    resource
      .expect_kind(kind)
      .map_err(|fault| Error::Corrupt(fault.to_string()))?;
    if resource.id() != from_db(self.id) {
      return Err(Error::Corrupt(format!(
        "row {}:{} holds {}",
        self.kind,
        self.id,
        resource.reference()
      )));
    }
    Ok(resource)
  }
}

impl TryFrom<NodeRow> for GraphNode {
  type Error = Error;

  fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
    let kind: ResourceKind = row.resource_kind.parse().map_err(Error::Corrupt)?;
    Ok(GraphNode {
      id: NodeId(from_db(row.id)),
      owner_id: UserId(from_db(row.owner_id)),
      org_id: OrgId(from_db(row.org_id)),
      resource: ResourceRef::new(kind, from_db(row.resource_id)),
      parent_node_id: row.parent_node_id.map(|id| NodeId(from_db(id))),
      origin_node_id: NodeId(from_db(row.origin_node_id)),
      shared_origin_node_id: row.shared_origin_node_id.map(|id| NodeId(from_db(id))),
      status: parse_status(&row.status)?,
      project_id: row.project_id.map(|id| ProjectId(from_db(id))),
    })
  }
}

impl From<ProjectRow> for Project {
  fn from(row: ProjectRow) -> Self {
    Project {
      id: ProjectId(from_db(row.id)),
      name: row.name,
      owner_id: UserId(from_db(row.owner_id)),
      org_id: OrgId(from_db(row.org_id)),
    }
  }
}
