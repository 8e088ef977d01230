//! Flow links: edges between flow origins, independent of the tree.

use conflux_graph::{FlowLink, GraphError, LinkType, ResourceRef, Topology};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::Viewer;
use crate::engine::Transaction;
use crate::events::EventType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFlowLink {
  pub left: ResourceRef,
  pub right: ResourceRef,
  pub link_type: LinkType,
  #[serde(default)]
  pub retriever_data_source_id: Option<u64>,
}

/// Links touching the flow that contains `r`.
pub(crate) fn links_for(topology: &Topology, r: ResourceRef) -> Result<Vec<FlowLink>, GraphError> {
  topology.require_resource(r)?;
  let origin = topology.require_node_for(r)?.origin_node_id;
  Ok(
    topology
      .links()
      .filter(|link| link.involves(origin))
      .cloned()
      .collect(),
  )
}

impl Transaction<'_> {
  pub(crate) fn create_link(
    &mut self,
    viewer: &Viewer,
    new: NewFlowLink,
  ) -> Result<FlowLink, GraphError> {
    let mut left = self.operable_origin(viewer, new.left)?;
    let mut right = self.operable_origin(viewer, new.right)?;
    if left == right {
      return Err(GraphError::bad_request(format!(
        "{} and {} belong to the same flow",
        new.left, new.right
      )));
    }
    if new.link_type.is_symmetric() && left > right {
      std::mem::swap(&mut left, &mut right);
    }
    if let Some(source_id) = new.retriever_data_source_id
      && self.topology.source(source_id).is_none()
    {
      return Err(GraphError::not_found(ResourceRef::source(source_id)));
    }

    let duplicate = self.topology.links().any(|link| {
      link.link_type == new.link_type
        && link.left_origin_node_id == left
        && link.right_origin_node_id == right
        && link.retriever_data_source_id == new.retriever_data_source_id
    });
    if duplicate {
      return Err(GraphError::conflict(
        format!("{} and {} are already linked", new.left, new.right),
        vec![new.left, new.right],
      ));
    }

    let link = FlowLink {
      id: self.topology.allocate_link_id(),
      link_type: new.link_type,
      left_origin_node_id: left,
      right_origin_node_id: right,
      retriever_data_source_id: new.retriever_data_source_id,
    };
    self.topology.insert_link(link.clone());
    self.emit(new.left, EventType::LinkCreated);
    info!(link_id = link.id, left = %left, right = %right, "flow link created");
    Ok(link)
  }

  pub(crate) fn delete_link(&mut self, viewer: &Viewer, link_id: u64) -> Result<(), GraphError> {
    let link = self
      .topology
      .link(link_id)
      .ok_or_else(|| GraphError::not_found(format!("link {}", link_id)))?;
    let left = link.left_origin_node_id;
    let node = self.topology.resolve(left, left)?;
    if !self.access().can_operate(node, viewer) {
      return Err(GraphError::forbidden(format!("cannot unlink {}", node.resource)));
    }
    let resource = node.resource;

    self.topology.remove_link(link_id);
    self.emit(resource, EventType::LinkDeleted);
    Ok(())
  }
}
