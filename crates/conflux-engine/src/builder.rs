//! Topology builder: creates and repairs graph nodes.
//!
//! A node's parent pointer mirrors the parent recorded on its resource. Its
//! origin is inherited from the parent unless the resource is derived from a
//! shared one (different org, or a different owner without collaborator
//! access to the parent), in which case the node roots its own chain and
//! records the parent's origin as its shared origin. Sources always root their
//! own flow; a source fed by a sink only points back at it.

use std::collections::{HashSet, VecDeque};

use conflux_graph::{
  DataSet, DataSink, DataSource, GraphError, GraphNode, NodeId, ProjectId, Resource, ResourceKind,
  ResourceRef, Transform,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::access::Viewer;
use crate::engine::Transaction;
use crate::events::EventType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
  pub name: String,
  pub connector_type: String,
  #[serde(default)]
  pub data_sink_id: Option<u64>,
  #[serde(default)]
  pub credential_id: Option<u64>,
  #[serde(default)]
  pub project_id: Option<ProjectId>,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSet {
  pub name: String,
  /// A source or a set.
  pub parent: ResourceRef,
  #[serde(default)]
  pub transform: Option<Transform>,
  #[serde(default)]
  pub code_container_id: Option<u64>,
  #[serde(default)]
  pub output_schema: serde_json::Value,
  #[serde(default)]
  pub project_id: Option<ProjectId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSink {
  pub name: String,
  pub connector_type: String,
  #[serde(default)]
  pub data_set_id: Option<u64>,
  #[serde(default)]
  pub credential_id: Option<u64>,
  #[serde(default)]
  pub project_id: Option<ProjectId>,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}

/// Pointer triple computed for a resource. `origin: None` means the node is
/// its own origin.
struct NodeLinks {
  parent: Option<NodeId>,
  origin: Option<NodeId>,
  shared_origin: Option<NodeId>,
}

impl Transaction<'_> {
  /// Whether `child` counts as derived from a shared `parent`, judged with the
  /// child owner's own rights.
  fn is_derived_from_shared(&self, child: &Resource, parent: &GraphNode) -> bool {
    if child.org_id() != parent.org_id {
      return true;
    }
    let child_owner = self.owner_as_viewer(child.owner_id(), child.org_id());
    !self.access().can_write(parent, &child_owner)
  }

  fn compute_links(&self, resource: &Resource) -> Result<NodeLinks, GraphError> {
    let Some(parent_ref) = resource.declared_parent() else {
      return Ok(NodeLinks {
        parent: None,
        origin: None,
        shared_origin: None,
      });
    };

    // A declared parent without a node is a broken invariant, not user error.
    let parent = self.topology.require_node_for(parent_ref)?;
    let derived = self.is_derived_from_shared(resource, parent);

    let links = if resource.kind() == ResourceKind::Source {
      NodeLinks {
        parent: Some(parent.id),
        origin: None,
        shared_origin: derived.then_some(parent.origin_node_id),
      }
    } else if derived {
      NodeLinks {
        parent: Some(parent.id),
        origin: None,
        shared_origin: Some(parent.origin_node_id),
      }
    } else {
      NodeLinks {
        parent: Some(parent.id),
        origin: Some(parent.origin_node_id),
        shared_origin: None,
      }
    };
    Ok(links)
  }

  /// Create the graph node for a resource, or repair it if one exists.
  pub(crate) fn build_node(&mut self, r: ResourceRef) -> Result<NodeId, GraphError> {
    if let Some(existing) = self.topology.node_for(r) {
      let id = existing.id;
      self.relink(r)?;
      return Ok(id);
    }

    let resource = self.topology.require_resource(r)?;
    let links = self.compute_links(resource)?;
    let (owner_id, org_id) = (resource.owner_id(), resource.org_id());
    let (status, project_id) = (resource.status(), resource.project_id());

    let id = self.topology.allocate_node_id();
    let node = GraphNode {
      id,
      owner_id,
      org_id,
      resource: r,
      parent_node_id: links.parent,
      origin_node_id: links.origin.unwrap_or(id),
      shared_origin_node_id: links.shared_origin,
      status,
      project_id,
    };
    self.topology.insert_node(node)?;
    debug!(resource = %r, node_id = %id, "graph node created");
    Ok(id)
  }

  /// Recompute one node's pointers from its resource.
  fn relink(&mut self, r: ResourceRef) -> Result<(), GraphError> {
    let resource = self.topology.require_resource(r)?;
    let links = self.compute_links(resource)?;
    let (owner_id, org_id, status) = (resource.owner_id(), resource.org_id(), resource.status());
    let id = self.topology.require_node_for(r)?.id;

    self.topology.set_node_links(
      id,
      links.parent,
      links.origin.unwrap_or(id),
      links.shared_origin,
    )?;
    self.topology.set_node_owner(id, owner_id, org_id);
    self.topology.set_node_status(id, status);
    Ok(())
  }

  /// Reapply the pointer rule to `r` and then to every structural descendant,
  /// top-down. Parents are always relinked before their children.
  pub(crate) fn reset(&mut self, r: ResourceRef) -> Result<(), GraphError> {
    // Relinking never touches declared parents, so one index serves the walk.
    let index = self.topology.structural_index();
    let mut queue = VecDeque::from([r]);
    let mut visited = HashSet::new();
    while let Some(current) = queue.pop_front() {
      if !visited.insert(current) {
        continue;
      }
      self.relink(current)?;
      if let Some(children) = index.get(&current) {
        queue.extend(children.iter().copied());
      }
    }
    debug!(resource = %r, relinked = visited.len(), "topology reset");
    Ok(())
  }

  pub(crate) fn require_writable_parent(
    &self,
    viewer: &Viewer,
    parent: ResourceRef,
  ) -> Result<(), GraphError> {
    self.topology.require_resource(parent)?;
    let node = self.topology.require_node_for(parent)?;
    if !self.access().can_write(node, viewer) && !self.access().is_sharer_only(node, viewer) {
      return Err(GraphError::forbidden(format!(
        "no write access to parent {}",
        parent
      )));
    }
    Ok(())
  }

  /// Sources may only hang off sinks whose connector supports dependent flows.
  fn require_dependent_feed(&self, sink_id: u64) -> Result<(), GraphError> {
    let connector_type = self
      .topology
      .sink(sink_id)
      .map(|s| s.connector_type.as_str())
      .unwrap_or_default();
    let supported = self
      .config
      .connector(connector_type)
      .is_some_and(|c| c.supports_dependent_flow);
    if !supported {
      return Err(GraphError::bad_request(format!(
        "sink {} ({}) cannot feed a dependent source",
        sink_id, connector_type
      )));
    }
    Ok(())
  }

  fn require_unmanaged_parent(&self, parent: ResourceRef) -> Result<(), GraphError> {
    if parent.kind == ResourceKind::Set && self.is_splitter(parent.id) {
      return Err(GraphError::method_not_allowed(format!(
        "set {} is a splitter; its children are managed by its rules",
        parent.id
      )));
    }
    Ok(())
  }

  fn require_project(&self, project_id: Option<ProjectId>) -> Result<(), GraphError> {
    match project_id {
      Some(id) if self.topology.project(id).is_none() => {
        Err(GraphError::not_found(format!("project {}", id)))
      }
      _ => Ok(()),
    }
  }

  pub(crate) fn insert_and_build(&mut self, resource: Resource) -> Result<ResourceRef, GraphError> {
    let r = resource.reference();
    self.topology.insert_resource(resource)?;
    self.build_node(r)?;
    self.emit(r, EventType::Created);
    Ok(r)
  }

  pub(crate) fn create_source(
    &mut self,
    viewer: &Viewer,
    new: NewSource,
  ) -> Result<DataSource, GraphError> {
    self.require_project(new.project_id)?;
    if let Some(sink_id) = new.data_sink_id {
      let sink_ref = ResourceRef::sink(sink_id);
      self.require_writable_parent(viewer, sink_ref)?;
      self.require_dependent_feed(sink_id)?;
    }

    let source = DataSource {
      id: self.topology.allocate_resource_id(ResourceKind::Source),
      name: new.name,
      owner_id: viewer.user_id,
      org_id: viewer.org_id,
      project_id: new.project_id,
      status: Default::default(),
      connector_type: new.connector_type,
      data_sink_id: new.data_sink_id,
      credential_id: new.credential_id,
      config: new.config,
    };
    self.insert_and_build(Resource::Source(source.clone()))?;
    Ok(source)
  }

  pub(crate) fn create_set(&mut self, viewer: &Viewer, new: NewSet) -> Result<DataSet, GraphError> {
    self.require_project(new.project_id)?;
    self.require_writable_parent(viewer, new.parent)?;
    self.require_unmanaged_parent(new.parent)?;

    let id = self.topology.allocate_resource_id(ResourceKind::Set);
    let mut resource = Resource::Set(DataSet {
      id,
      name: new.name,
      owner_id: viewer.user_id,
      org_id: viewer.org_id,
      project_id: new.project_id,
      status: Default::default(),
      data_source_id: None,
      parent_data_set_id: None,
      transform: None,
      code_container_id: new.code_container_id,
      output_schema: new.output_schema,
      samples: Vec::new(),
      cached_samples: Vec::new(),
    });
    resource.set_declared_parent(Some(new.parent))?;
    self.insert_and_build(resource)?;

    // A set created with a splitter transform gets its branches immediately.
    if new.transform.is_some() {
      self.apply_transform(id, new.transform)?;
    }

    self
      .topology
      .set(id)
      .cloned()
      .ok_or_else(|| GraphError::not_found(ResourceRef::set(id)))
  }

  pub(crate) fn create_sink(
    &mut self,
    viewer: &Viewer,
    new: NewSink,
  ) -> Result<DataSink, GraphError> {
    self.require_project(new.project_id)?;
    if let Some(set_id) = new.data_set_id {
      let parent = ResourceRef::set(set_id);
      self.require_writable_parent(viewer, parent)?;
      self.require_unmanaged_parent(parent)?;
    }

    let sink = DataSink {
      id: self.topology.allocate_resource_id(ResourceKind::Sink),
      name: new.name,
      owner_id: viewer.user_id,
      org_id: viewer.org_id,
      project_id: new.project_id,
      status: Default::default(),
      connector_type: new.connector_type,
      data_set_id: new.data_set_id,
      credential_id: new.credential_id,
      config: new.config,
    };
    self.insert_and_build(Resource::Sink(sink.clone()))?;
    Ok(sink)
  }

  /// Move `r` under a new parent (or detach it) and repair the subtree.
  pub(crate) fn reparent(
    &mut self,
    viewer: &Viewer,
    r: ResourceRef,
    parent: Option<ResourceRef>,
  ) -> Result<(), GraphError> {
    self.topology.require_resource(r)?;
    let node = self.topology.require_node_for(r)?;
    if !self.access().can_manage(node, viewer) {
      return Err(GraphError::forbidden(format!("cannot move {}", r)));
    }
    if self.is_branch(r) {
      return Err(GraphError::method_not_allowed(format!(
        "{} is a splitter branch and follows its splitter",
        r
      )));
    }

    if let Some(parent_ref) = parent {
      self.require_writable_parent(viewer, parent_ref)?;
      self.require_unmanaged_parent(parent_ref)?;
      if parent_ref.kind == ResourceKind::Sink {
        self.require_dependent_feed(parent_ref.id)?;
      }
      let node_id = node.id;
      let parent_node = self.topology.require_node_for(parent_ref)?.id;
      if parent_node == node_id || self.topology.descendants(node_id).contains(&parent_node) {
        return Err(GraphError::bad_request(format!(
          "{} cannot be moved under its own descendant {}",
          r, parent_ref
        )));
      }
    }

    self
      .topology
      .require_resource_mut(r)?
      .set_declared_parent(parent)?;
    self.reset(r)?;
    self.emit(r, EventType::Reparented);
    Ok(())
  }
}
