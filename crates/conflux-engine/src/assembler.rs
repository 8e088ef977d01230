//! Flow assembly: the read side of the topology.
//!
//! A flow is assembled by walking up from the requested resource to the
//! highest ancestor the viewer may reach, then down from there through every
//! child the viewer may traverse into. The result carries both a nested tree
//! of ids and flat per-kind buckets with the hydrated resources.

use std::collections::{BTreeSet, HashMap, HashSet};

use conflux_config::{ConnectorCategory, EngineConfig};
use conflux_graph::{
  Fault, FlowLink, GraphError, GraphNode, NodeId, Project, Resource, ResourceKind, ResourceRef,
  Topology, TriggerEdge,
};
use serde::Serialize;
use tracing::debug;

use crate::access::{AccessEvaluator, AccessProvider, Role, Viewer};
use crate::providers::{Doc, DocProvider, TagProvider};

/// Nested view of a flow. Only ids; resource data lives in the buckets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowTree {
  pub node_id: NodeId,
  pub resource: ResourceRef,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub docs: Vec<Doc>,
  pub children: Vec<FlowTree>,
}

impl FlowTree {
  fn leaf(node: &GraphNode) -> Self {
    Self {
      node_id: node.id,
      resource: node.resource,
      docs: Vec::new(),
      children: Vec::new(),
    }
  }

  /// Every resource in the tree, pre-order.
  pub fn resources(&self) -> Vec<ResourceRef> {
    let mut result = Vec::new();
    let mut stack = vec![self];
    while let Some(tree) = stack.pop() {
      result.push(tree.resource);
      stack.extend(tree.children.iter().rev());
    }
    result
  }
}

/// A resource annotated for one viewer.
#[derive(Debug, Clone, Serialize)]
pub struct FlowEntry {
  #[serde(flatten)]
  pub resource: Resource,
  pub node_id: NodeId,
  pub origin_node_id: NodeId,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shared_origin_node_id: Option<NodeId>,
  pub access_role: Option<Role>,
  pub tags: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub connector_category: Option<ConnectorCategory>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowResult {
  pub flows: Vec<FlowTree>,
  pub data_sources: Vec<FlowEntry>,
  pub data_sets: Vec<FlowEntry>,
  pub data_sinks: Vec<FlowEntry>,
  pub projects: Vec<Project>,
  pub triggers: Vec<TriggerEdge>,
  pub links: Vec<FlowLink>,
}

impl FlowResult {
  pub fn entry(&self, r: ResourceRef) -> Option<&FlowEntry> {
    self.bucket(r.kind).iter().find(|e| e.resource.id() == r.id)
  }

  pub fn contains(&self, r: ResourceRef) -> bool {
    self.entry(r).is_some()
  }

  pub fn len(&self) -> usize {
    self.data_sources.len() + self.data_sets.len() + self.data_sinks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn bucket(&self, kind: ResourceKind) -> &Vec<FlowEntry> {
    match kind {
      ResourceKind::Source => &self.data_sources,
      ResourceKind::Set => &self.data_sets,
      ResourceKind::Sink => &self.data_sinks,
    }
  }

  fn bucket_mut(&mut self, kind: ResourceKind) -> &mut Vec<FlowEntry> {
    match kind {
      ResourceKind::Source => &mut self.data_sources,
      ResourceKind::Set => &mut self.data_sets,
      ResourceKind::Sink => &mut self.data_sinks,
    }
  }
}

pub struct FlowAssembler<'a> {
  topology: &'a Topology,
  config: &'a EngineConfig,
  provider: &'a dyn AccessProvider,
  tags: &'a dyn TagProvider,
  docs: &'a dyn DocProvider,
}

impl<'a> FlowAssembler<'a> {
  pub fn new(
    topology: &'a Topology,
    config: &'a EngineConfig,
    provider: &'a dyn AccessProvider,
    tags: &'a dyn TagProvider,
    docs: &'a dyn DocProvider,
  ) -> Self {
    Self {
      topology,
      config,
      provider,
      tags,
      docs,
    }
  }

  fn access(&self) -> AccessEvaluator<'a> {
    AccessEvaluator::new(self.topology, self.provider)
  }

  /// The flow containing `r`, as far as `viewer` can see it.
  pub fn assemble(&self, viewer: &Viewer, r: ResourceRef) -> Result<FlowResult, GraphError> {
    let top = self.find_top(viewer, r)?;
    let (tree, visited) = self.collect_down(viewer, top)?;
    debug!(resource = %r, top = %top, nodes = visited.len(), "flow assembled");
    self.hydrate(viewer, vec![tree], &visited)
  }

  /// Assemble several flows and merge the results.
  pub fn assemble_many(
    &self,
    viewer: &Viewer,
    resources: &[ResourceRef],
  ) -> Result<FlowResult, GraphError> {
    let mut merged = FlowResult::default();
    for r in resources {
      let result = self.assemble(viewer, *r)?;
      merged = merge_results(merged, result);
    }
    Ok(merged)
  }

  /// Every flow root the viewer can read. Trees are built from ids first;
  /// resources are loaded once, for the ids that ended up in a tree.
  pub fn list(
    &self,
    viewer: &Viewer,
    data_source_ids: Option<&[u64]>,
  ) -> Result<FlowResult, GraphError> {
    let access = self.access();
    let mut roots: Vec<(usize, NodeId)> = Vec::new();
    for node in self.topology.nodes() {
      let wanted = match data_source_ids {
        Some(ids) => node.resource.kind == ResourceKind::Source && ids.contains(&node.resource.id),
        None => true,
      };
      if node.is_origin() && wanted && access.can_read(node, viewer) {
        roots.push((self.topology.depth(node.id)?, node.id));
      }
    }
    // Shallow roots first so deeper flows land inside the tree above them
    // when the viewer can reach them from there.
    roots.sort();

    let mut trees = Vec::new();
    let mut visited: Vec<NodeId> = Vec::new();
    let mut seen = HashSet::new();
    for (_, root) in roots {
      if seen.contains(&root) {
        continue;
      }
      let (tree, nodes) = self.collect_down(viewer, root)?;
      visited.extend(nodes.into_iter().filter(|id| seen.insert(*id)));
      trees.push(tree);
    }

    debug!(flows = trees.len(), nodes = visited.len(), "flows listed");
    self.hydrate(viewer, trees, &visited)
  }

  /// Walk parent pointers from `r` while the viewer may cross each edge.
  fn find_top(&self, viewer: &Viewer, r: ResourceRef) -> Result<NodeId, GraphError> {
    self.topology.require_resource(r)?;
    let start = self.topology.require_node_for(r)?;
    let access = self.access();
    if !access.can_read(start, viewer) {
      return Err(GraphError::forbidden(format!("cannot read {}", r)));
    }

    let mut top = start;
    for _ in 0..=self.topology.node_count() {
      let Some(parent_id) = top.parent_node_id else {
        return Ok(top.id);
      };
      let parent = self.topology.resolve(top.id, parent_id)?;
      if !access.can_traverse(viewer, parent, top) {
        return Ok(top.id);
      }
      top = parent;
    }
    Err(Fault::ParentCycle(start.id).into())
  }

  /// Pre-order walk below `top` through traversable children, building the
  /// id tree without recursion.
  fn collect_down(
    &self,
    viewer: &Viewer,
    top: NodeId,
  ) -> Result<(FlowTree, Vec<NodeId>), GraphError> {
    let access = self.access();
    let mut order: Vec<(&GraphNode, Option<usize>)> = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(self.topology.resolve(top, top)?, None)];

    while let Some((node, parent_index)) = stack.pop() {
      if !seen.insert(node.id) {
        return Err(Fault::ParentCycle(node.id).into());
      }
      let index = order.len();
      order.push((node, parent_index));
      let children: Vec<&GraphNode> = self
        .topology
        .children(node.id)
        .filter(|child| access.can_traverse(viewer, node, child))
        .collect();
      stack.extend(children.into_iter().rev().map(|child| (child, Some(index))));
    }

    // Reverse pre-order completes every subtree before its parent.
    let mut built: Vec<Option<FlowTree>> = order
      .iter()
      .map(|(node, _)| Some(FlowTree::leaf(node)))
      .collect();
    for index in (1..order.len()).rev() {
      if let Some(parent) = order[index].1
        && let Some(tree) = built[index].take()
        && let Some(parent_tree) = built[parent].as_mut()
      {
        parent_tree.children.insert(0, tree);
      }
    }

    let tree = built
      .first_mut()
      .and_then(Option::take)
      .ok_or(Fault::DanglingPointer { from: top, to: top })?;
    let visited = order.into_iter().map(|(node, _)| node.id).collect();
    Ok((tree, visited))
  }

  fn connector_category(&self, resource: &Resource) -> Option<ConnectorCategory> {
    let connector_type = match resource {
      Resource::Source(source) => &source.connector_type,
      Resource::Sink(sink) => &sink.connector_type,
      Resource::Set(_) => return None,
    };
    self.config.connector(connector_type).map(|c| c.category)
  }

  fn project_visible(&self, viewer: &Viewer, project: &Project) -> bool {
    project.owner_id == viewer.user_id
      || viewer.is_super_user()
      || viewer.is_org_admin_of(project.org_id)
  }

  /// Load resources for `visited` and attach per-viewer annotations.
  fn hydrate(
    &self,
    viewer: &Viewer,
    mut flows: Vec<FlowTree>,
    visited: &[NodeId],
  ) -> Result<FlowResult, GraphError> {
    let access = self.access();
    let mut nodes = Vec::with_capacity(visited.len());
    for id in visited {
      nodes.push(self.topology.resolve(*id, *id)?);
    }
    let refs: Vec<ResourceRef> = nodes.iter().map(|node| node.resource).collect();
    let mut tags = self.tags.tags_for(&refs);

    let mut result = FlowResult::default();
    let mut origins = BTreeSet::new();
    let mut project_ids = BTreeSet::new();
    for node in nodes {
      let resource = self.topology.require_resource(node.resource)?.clone();
      origins.insert(node.origin_node_id);
      if let Some(project_id) = resource.project_id() {
        project_ids.insert(project_id);
      }
      let entry = FlowEntry {
        node_id: node.id,
        origin_node_id: node.origin_node_id,
        shared_origin_node_id: node.shared_origin_node_id,
        access_role: access.access_role(node, viewer),
        tags: tags.remove(&node.resource).unwrap_or_default(),
        connector_category: self.connector_category(&resource),
        resource,
      };
      result.bucket_mut(node.resource.kind).push(entry);
    }

    for tree in &mut flows {
      if let Some(node) = self.topology.node(tree.node_id) {
        tree.docs = self.docs.docs_for(node.origin_node_id);
      }
    }

    result.flows = flows;
    result.projects = project_ids
      .into_iter()
      .filter_map(|id| self.topology.project(id))
      .filter(|project| self.project_visible(viewer, project))
      .cloned()
      .collect();
    result.triggers = self
      .topology
      .triggers()
      .filter(|t| {
        origins.contains(&t.triggering_origin_node_id)
          || origins.contains(&t.triggered_origin_node_id)
      })
      .cloned()
      .collect();
    result.links = self
      .topology
      .links()
      .filter(|l| {
        origins.contains(&l.left_origin_node_id) || origins.contains(&l.right_origin_node_id)
      })
      .cloned()
      .collect();
    Ok(result)
  }
}

/// Concatenate two results, keeping the first occurrence of every id.
pub fn merge_results(mut into: FlowResult, from: FlowResult) -> FlowResult {
  fn extend_unique<T, K: Eq + std::hash::Hash>(
    into: &mut Vec<T>,
    from: Vec<T>,
    key: impl Fn(&T) -> K,
  ) {
    let mut seen: HashSet<K> = into.iter().map(&key).collect();
    into.extend(from.into_iter().filter(|item| seen.insert(key(item))));
  }

  extend_unique(&mut into.data_sources, from.data_sources, |e| e.resource.reference());
  extend_unique(&mut into.data_sets, from.data_sets, |e| e.resource.reference());
  extend_unique(&mut into.data_sinks, from.data_sinks, |e| e.resource.reference());
  extend_unique(&mut into.projects, from.projects, |p| p.id);
  extend_unique(&mut into.triggers, from.triggers, |t| t.id);
  extend_unique(&mut into.links, from.links, |l| l.id);

  let mut flows = std::mem::take(&mut into.flows);
  flows.extend(from.flows);
  into.flows = merge_trees(flows);
  into
}

/// Merge trees that share a node id, recursively merging their children.
/// Order follows first appearance.
pub fn merge_trees(trees: Vec<FlowTree>) -> Vec<FlowTree> {
  let mut order: Vec<NodeId> = Vec::new();
  let mut groups: HashMap<NodeId, Vec<FlowTree>> = HashMap::new();
  for tree in trees {
    if !groups.contains_key(&tree.node_id) {
      order.push(tree.node_id);
    }
    groups.entry(tree.node_id).or_default().push(tree);
  }

  order
    .into_iter()
    .filter_map(|id| groups.remove(&id))
    .filter_map(|group| group.into_iter().reduce(merge_pair))
    .collect()
}

fn merge_pair(mut left: FlowTree, right: FlowTree) -> FlowTree {
  if left.docs.is_empty() {
    left.docs = right.docs;
  }
  let mut children = std::mem::take(&mut left.children);
  children.extend(right.children);
  left.children = merge_trees(children);
  left
}
