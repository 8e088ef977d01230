use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::edges::{FlowLink, Project, TriggerEdge};
use crate::error::{Fault, GraphError};
use crate::ids::{NodeId, OrgId, ProjectId, ResourceKind, ResourceRef, UserId};
use crate::node::{GraphNode, ResourceStatus};
use crate::resource::{DataSet, DataSink, DataSource, Resource};

/// Id-keyed arena holding every resource, graph node, and cross-flow edge.
///
/// Parent/child adjacency is kept as an index next to the nodes. Node pointer
/// fields are only changed through [`Topology::set_node_links`] so the index
/// never drifts.
#[derive(Debug, Clone, Default)]
pub struct Topology {
  nodes: BTreeMap<NodeId, GraphNode>,
  node_by_resource: HashMap<ResourceRef, NodeId>,
  children: HashMap<NodeId, BTreeSet<NodeId>>,
  resources: BTreeMap<ResourceRef, Resource>,
  projects: BTreeMap<ProjectId, Project>,
  triggers: BTreeMap<u64, TriggerEdge>,
  links: BTreeMap<u64, FlowLink>,
  sequences: Sequences,
}

#[derive(Debug, Clone, Default)]
struct Sequences {
  node: u64,
  source: u64,
  set: u64,
  sink: u64,
  project: u64,
  trigger: u64,
  link: u64,
}

fn bump(counter: &mut u64) -> u64 {
  *counter += 1;
  *counter
}

impl Topology {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rebuild an arena from persisted rows. Indexes and id sequences are
  /// recomputed from the data.
  pub fn from_parts(
    nodes: Vec<GraphNode>,
    resources: Vec<Resource>,
    projects: Vec<Project>,
    triggers: Vec<TriggerEdge>,
    links: Vec<FlowLink>,
  ) -> Result<Self, GraphError> {
    let mut topology = Topology::new();
    for project in projects {
      topology.sequences.project = topology.sequences.project.max(project.id.0);
      topology.projects.insert(project.id, project);
    }
    for resource in resources {
      let counter = topology.sequence_for(resource.kind());
      *counter = (*counter).max(resource.id());
      topology.resources.insert(resource.reference(), resource);
    }
    for node in nodes {
      topology.sequences.node = topology.sequences.node.max(node.id.0);
      topology.insert_node(node)?;
    }
    for trigger in triggers {
      topology.sequences.trigger = topology.sequences.trigger.max(trigger.id);
      topology.triggers.insert(trigger.id, trigger);
    }
    for link in links {
      topology.sequences.link = topology.sequences.link.max(link.id);
      topology.links.insert(link.id, link);
    }
    Ok(topology)
  }

  fn sequence_for(&mut self, kind: ResourceKind) -> &mut u64 {
    match kind {
      ResourceKind::Source => &mut self.sequences.source,
      ResourceKind::Set => &mut self.sequences.set,
      ResourceKind::Sink => &mut self.sequences.sink,
    }
  }

  pub fn allocate_node_id(&mut self) -> NodeId {
    NodeId(bump(&mut self.sequences.node))
  }

  pub fn allocate_resource_id(&mut self, kind: ResourceKind) -> u64 {
    bump(self.sequence_for(kind))
  }

  pub fn allocate_trigger_id(&mut self) -> u64 {
    bump(&mut self.sequences.trigger)
  }

  pub fn allocate_link_id(&mut self) -> u64 {
    bump(&mut self.sequences.link)
  }

  pub fn allocate_project_id(&mut self) -> ProjectId {
    ProjectId(bump(&mut self.sequences.project))
  }

  // Resources

  pub fn resources(&self) -> impl Iterator<Item = &Resource> {
    self.resources.values()
  }

  pub fn resource(&self, r: ResourceRef) -> Option<&Resource> {
    self.resources.get(&r)
  }

  pub fn resource_mut(&mut self, r: ResourceRef) -> Option<&mut Resource> {
    self.resources.get_mut(&r)
  }

  pub fn require_resource(&self, r: ResourceRef) -> Result<&Resource, GraphError> {
    self.resource(r).ok_or_else(|| GraphError::not_found(r))
  }

  pub fn require_resource_mut(&mut self, r: ResourceRef) -> Result<&mut Resource, GraphError> {
    self.resources.get_mut(&r).ok_or_else(|| GraphError::not_found(r))
  }

  pub fn source(&self, id: u64) -> Option<&DataSource> {
    match self.resources.get(&ResourceRef::source(id)) {
      Some(Resource::Source(source)) => Some(source),
      _ => None,
    }
  }

  pub fn set(&self, id: u64) -> Option<&DataSet> {
    match self.resources.get(&ResourceRef::set(id)) {
      Some(Resource::Set(set)) => Some(set),
      _ => None,
    }
  }

  pub fn set_mut(&mut self, id: u64) -> Option<&mut DataSet> {
    match self.resources.get_mut(&ResourceRef::set(id)) {
      Some(Resource::Set(set)) => Some(set),
      _ => None,
    }
  }

  pub fn sink(&self, id: u64) -> Option<&DataSink> {
    match self.resources.get(&ResourceRef::sink(id)) {
      Some(Resource::Sink(sink)) => Some(sink),
      _ => None,
    }
  }

  pub fn insert_resource(&mut self, resource: Resource) -> Result<(), GraphError> {
    let r = resource.reference();
    if self.resources.contains_key(&r) {
      return Err(GraphError::conflict(format!("{} already exists", r), vec![r]));
    }
    let counter = self.sequence_for(r.kind);
    *counter = (*counter).max(r.id);
    self.resources.insert(r, resource);
    Ok(())
  }

  /// Remove a resource together with its graph node.
  pub fn remove_resource(&mut self, r: ResourceRef) -> Option<Resource> {
    if let Some(node_id) = self.node_by_resource.get(&r).copied() {
      self.remove_node(node_id);
    }
    self.resources.remove(&r)
  }

  /// Resources whose denormalized parent link points at `r`.
  pub fn structural_children(&self, r: ResourceRef) -> Vec<ResourceRef> {
    self
      .resources
      .values()
      .filter(|child| child.declared_parent() == Some(r))
      .map(Resource::reference)
      .collect()
  }

  /// Every declared parent mapped to its structural children, built in one
  /// pass. Stays valid while no declared parent changes.
  pub fn structural_index(&self) -> HashMap<ResourceRef, Vec<ResourceRef>> {
    let mut index: HashMap<ResourceRef, Vec<ResourceRef>> = HashMap::new();
    for resource in self.resources.values() {
      if let Some(parent) = resource.declared_parent() {
        index.entry(parent).or_default().push(resource.reference());
      }
    }
    index
  }

  // Nodes

  pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
    self.nodes.values()
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
    self.nodes.get(&id)
  }

  pub fn node_for(&self, r: ResourceRef) -> Option<&GraphNode> {
    self.node_by_resource.get(&r).and_then(|id| self.nodes.get(id))
  }

  /// The node for a resource that is required to have one.
  pub fn require_node_for(&self, r: ResourceRef) -> Result<&GraphNode, GraphError> {
    self
      .node_for(r)
      .ok_or_else(|| Fault::MissingGraphNode(r).into())
  }

  /// Follow a pointer held by `from`.
  pub fn resolve(&self, from: NodeId, to: NodeId) -> Result<&GraphNode, GraphError> {
    self
      .nodes
      .get(&to)
      .ok_or_else(|| Fault::DanglingPointer { from, to }.into())
  }

  pub fn insert_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
    if let Some(existing) = self.node_by_resource.get(&node.resource)
      && *existing != node.id
    {
      return Err(GraphError::conflict(
        format!("{} already owns graph node {}", node.resource, existing),
        vec![node.resource],
      ));
    }
    if let Some(parent) = node.parent_node_id {
      self.children.entry(parent).or_default().insert(node.id);
    }
    self.node_by_resource.insert(node.resource, node.id);
    self.sequences.node = self.sequences.node.max(node.id.0);
    self.nodes.insert(node.id, node);
    Ok(())
  }

  pub fn remove_node(&mut self, id: NodeId) -> Option<GraphNode> {
    let node = self.nodes.remove(&id)?;
    if let Some(parent) = node.parent_node_id {
      self.unlink_child(parent, id);
    }
    self.node_by_resource.remove(&node.resource);
    Some(node)
  }

  fn unlink_child(&mut self, parent: NodeId, id: NodeId) {
    if let Some(siblings) = self.children.get_mut(&parent) {
      siblings.remove(&id);
      if siblings.is_empty() {
        self.children.remove(&parent);
      }
    }
  }

  /// Rewrite the parent/origin/shared-origin triple of a node.
  pub fn set_node_links(
    &mut self,
    id: NodeId,
    parent_node_id: Option<NodeId>,
    origin_node_id: NodeId,
    shared_origin_node_id: Option<NodeId>,
  ) -> Result<(), GraphError> {
    let node = self
      .nodes
      .get_mut(&id)
      .ok_or(Fault::DanglingPointer { from: id, to: id })?;
    let previous_parent = node.parent_node_id;
    node.parent_node_id = parent_node_id;
    node.origin_node_id = origin_node_id;
    node.shared_origin_node_id = shared_origin_node_id;

    if previous_parent != parent_node_id {
      if let Some(parent) = previous_parent {
        self.unlink_child(parent, id);
      }
      if let Some(parent) = parent_node_id {
        self.children.entry(parent).or_default().insert(id);
      }
    }
    Ok(())
  }

  pub fn set_node_status(&mut self, id: NodeId, status: ResourceStatus) {
    if let Some(node) = self.nodes.get_mut(&id) {
      node.status = status;
    }
  }

  pub fn set_node_owner(&mut self, id: NodeId, owner_id: UserId, org_id: OrgId) {
    if let Some(node) = self.nodes.get_mut(&id) {
      node.owner_id = owner_id;
      node.org_id = org_id;
    }
  }

  /// Child node ids, in ascending order.
  pub fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
    self
      .children
      .get(&id)
      .map(|c| c.iter().copied().collect())
      .unwrap_or_default()
  }

  pub fn children(&self, id: NodeId) -> impl Iterator<Item = &GraphNode> {
    self
      .children
      .get(&id)
      .into_iter()
      .flat_map(|c| c.iter())
      .filter_map(|child| self.nodes.get(child))
  }

  /// Walk parent pointers from `id` to the first node that is its own origin.
  ///
  /// The walk is bounded by the node count; exceeding it means the parent
  /// chain is cyclic, which is a fault.
  pub fn root_of(&self, id: NodeId) -> Result<NodeId, GraphError> {
    let mut current = self.resolve(id, id)?;
    for _ in 0..=self.nodes.len() {
      if current.is_origin() {
        return Ok(current.id);
      }
      let parent = current
        .parent_node_id
        .ok_or(Fault::DanglingPointer {
          from: current.id,
          to: current.origin_node_id,
        })?;
      current = self.resolve(current.id, parent)?;
    }
    Err(Fault::ParentCycle(id).into())
  }

  /// Number of parent hops from `id` to a node without a parent.
  pub fn depth(&self, id: NodeId) -> Result<usize, GraphError> {
    let mut depth = 0;
    let mut current = self.resolve(id, id)?;
    while let Some(parent) = current.parent_node_id {
      depth += 1;
      if depth > self.nodes.len() {
        return Err(Fault::ParentCycle(id).into());
      }
      current = self.resolve(current.id, parent)?;
    }
    Ok(depth)
  }

  /// All nodes below `id` (excluding `id`), pre-order.
  pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
    let mut result = Vec::new();
    let mut stack: Vec<NodeId> = self.child_ids(id).into_iter().rev().collect();
    while let Some(current) = stack.pop() {
      result.push(current);
      stack.extend(self.child_ids(current).into_iter().rev());
    }
    result
  }

  // Projects

  pub fn projects(&self) -> impl Iterator<Item = &Project> {
    self.projects.values()
  }

  pub fn project(&self, id: ProjectId) -> Option<&Project> {
    self.projects.get(&id)
  }

  pub fn insert_project(&mut self, project: Project) {
    self.sequences.project = self.sequences.project.max(project.id.0);
    self.projects.insert(project.id, project);
  }

  // Trigger edges

  pub fn triggers(&self) -> impl Iterator<Item = &TriggerEdge> {
    self.triggers.values()
  }

  pub fn trigger(&self, id: u64) -> Option<&TriggerEdge> {
    self.triggers.get(&id)
  }

  pub fn insert_trigger(&mut self, trigger: TriggerEdge) {
    self.triggers.insert(trigger.id, trigger);
  }

  pub fn remove_trigger(&mut self, id: u64) -> Option<TriggerEdge> {
    self.triggers.remove(&id)
  }

  // Flow links

  pub fn links(&self) -> impl Iterator<Item = &FlowLink> {
    self.links.values()
  }

  pub fn link(&self, id: u64) -> Option<&FlowLink> {
    self.links.get(&id)
  }

  pub fn insert_link(&mut self, link: FlowLink) {
    self.links.insert(link.id, link);
  }

  pub fn remove_link(&mut self, id: u64) -> Option<FlowLink> {
    self.links.remove(&id)
  }
}
