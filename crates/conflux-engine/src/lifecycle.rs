//! Cascading lifecycle operations.
//!
//! Every cascade walks the subtree that shares the starting node's origin.
//! Nodes below a shared-derivation boundary belong to someone else's flow and
//! are never activated, paused, re-owned, or deleted through it. All walks use
//! explicit stacks.

use std::collections::{HashMap, HashSet};

use conflux_graph::{
  Fault, GraphError, GraphNode, NodeId, OrgId, Resource, ResourceKind, ResourceRef, ResourceStatus,
  UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::{AccessEvaluator, Role, Viewer};
use crate::engine::Transaction;
use crate::events::EventType;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CopyOptions {
  /// Also copy flows that hang off the copied one (dependent sources and
  /// shared derivations).
  #[serde(default)]
  pub include_dependent_flows: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOutcome {
  pub root: ResourceRef,
  /// `(original, copy)` pairs in pre-order.
  pub copied: Vec<(ResourceRef, ResourceRef)>,
}

impl Transaction<'_> {
  /// `root` and every descendant reachable without crossing an origin
  /// boundary, pre-order.
  pub(crate) fn same_origin_subtree(&self, root: NodeId) -> Vec<NodeId> {
    let mut result = Vec::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
      result.push(current);
      let Some(node) = self.topology.node(current) else {
        continue;
      };
      let mut same: Vec<NodeId> = self
        .topology
        .children(current)
        .filter(|child| child.origin_node_id == node.origin_node_id)
        .map(|child| child.id)
        .collect();
      same.reverse();
      stack.extend(same);
    }
    result
  }

  fn node_resource(&self, id: NodeId) -> Result<ResourceRef, GraphError> {
    self
      .topology
      .node(id)
      .map(|node| node.resource)
      .ok_or_else(|| Fault::DanglingPointer { from: id, to: id }.into())
  }

  /// Active resources among `nodes`.
  pub(crate) fn active_members(&self, nodes: &[NodeId]) -> Result<Vec<ResourceRef>, GraphError> {
    let mut active = Vec::new();
    for node_id in nodes {
      let resource_ref = self.node_resource(*node_id)?;
      if self.topology.require_resource(resource_ref)?.status() == ResourceStatus::Active {
        active.push(resource_ref);
      }
    }
    Ok(active)
  }

  /// Resolve `r`, check `allowed`, and refuse splitter branches.
  fn cascade_root(
    &self,
    r: ResourceRef,
    verb: &str,
    allowed: impl Fn(&AccessEvaluator<'_>, &GraphNode) -> bool,
  ) -> Result<NodeId, GraphError> {
    self.topology.require_resource(r)?;
    let node = self.topology.require_node_for(r)?;
    if !allowed(&self.access(), node) {
      return Err(GraphError::forbidden(format!("cannot {} {}", verb, r)));
    }
    if self.is_branch(r) {
      return Err(GraphError::method_not_allowed(format!(
        "cannot {} {}: splitter branches follow their splitter",
        verb, r
      )));
    }
    Ok(node.id)
  }

  fn apply_status(
    &mut self,
    viewer: &Viewer,
    r: ResourceRef,
    status: ResourceStatus,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    let verb = if status == ResourceStatus::Active { "activate" } else { "pause" };
    let root = self.cascade_root(r, verb, |access, node| access.can_operate(node, viewer))?;
    let event_type = if status == ResourceStatus::Active {
      EventType::Activated
    } else {
      EventType::Paused
    };

    let mut done = HashSet::new();
    let mut touched = Vec::new();
    for node_id in self.same_origin_subtree(root) {
      if done.contains(&node_id) {
        continue;
      }
      let current = self.node_resource(node_id)?;
      // A splitter carries its branches with it.
      let mut unit = vec![(node_id, current)];
      if current.kind == ResourceKind::Set && self.is_splitter(current.id) {
        for child in self.topology.child_ids(node_id) {
          let child_ref = self.node_resource(child)?;
          if self.is_branch(child_ref) {
            unit.push((child, child_ref));
          }
        }
      }

      for (id, resource_ref) in unit {
        if !done.insert(id) {
          continue;
        }
        let resource = self.topology.require_resource_mut(resource_ref)?;
        match status {
          ResourceStatus::Active => resource.activate()?,
          _ => resource.pause(),
        }
        self.topology.set_node_status(id, status);
        self.emit(resource_ref, event_type);
        touched.push(resource_ref);
      }
    }

    info!(resource = %r, status = status.as_str(), count = touched.len(), "status cascaded");
    Ok(touched)
  }

  pub(crate) fn activate(
    &mut self,
    viewer: &Viewer,
    r: ResourceRef,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    self.apply_status(viewer, r, ResourceStatus::Active)
  }

  pub(crate) fn pause(
    &mut self,
    viewer: &Viewer,
    r: ResourceRef,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    self.apply_status(viewer, r, ResourceStatus::Paused)
  }

  /// Deep-copy the flow below `r`. The copy belongs to `viewer`.
  pub(crate) fn copy(
    &mut self,
    viewer: &Viewer,
    r: ResourceRef,
    options: CopyOptions,
  ) -> Result<CopyOutcome, GraphError> {
    let root = self.cascade_root(r, "copy", |access, node| access.can_read(node, viewer))?;

    // A copied source starts its own flow; sets and sinks stay beside the
    // original.
    let root_parent = match r.kind {
      ResourceKind::Source => None,
      _ => self.topology.require_resource(r)?.declared_parent(),
    };
    if let Some(parent) = root_parent {
      self.require_writable_parent(viewer, parent)?;
    }

    let suffix = self.config.copy_name_suffix.clone();
    let mut mapping: HashMap<ResourceRef, ResourceRef> = HashMap::new();
    let mut copied = Vec::new();
    let mut pruned: Vec<(ResourceRef, u64)> = Vec::new();
    let mut stack: Vec<(NodeId, Option<ResourceRef>)> = vec![(root, root_parent)];

    while let Some((node_id, new_parent)) = stack.pop() {
      let (old, origin) = {
        let node = self.topology.resolve(node_id, node_id)?;
        (node.resource, node.origin_node_id)
      };

      let new_id = self.topology.allocate_resource_id(old.kind);
      let mut copy = self
        .topology
        .require_resource(old)?
        .copy_as(new_id, viewer.user_id, viewer.org_id, &suffix);
      copy.set_declared_parent(new_parent)?;
      let new_ref = copy.reference();
      self.topology.insert_resource(copy)?;
      self.build_node(new_ref)?;
      self.emit(new_ref, EventType::Copied);
      mapping.insert(old, new_ref);
      copied.push((old, new_ref));

      let children: Vec<(NodeId, NodeId, ResourceRef)> = self
        .topology
        .children(node_id)
        .map(|child| (child.id, child.origin_node_id, child.resource))
        .collect();
      for (child_id, child_origin, child_ref) in children.into_iter().rev() {
        if child_origin == origin || options.include_dependent_flows {
          stack.push((child_id, Some(new_ref)));
        } else if old.kind == ResourceKind::Sink && child_ref.kind == ResourceKind::Source {
          debug!(sink = %new_ref, source = %child_ref, "dependent flow not copied");
          pruned.push((new_ref, child_ref.id));
        }
      }
    }

    self.remap_copied(&mapping, &pruned)?;

    let root_copy = mapping
      .get(&r)
      .copied()
      .ok_or(Fault::MissingGraphNode(r))?;
    info!(resource = %r, copy = %root_copy, count = copied.len(), "flow copied");
    Ok(CopyOutcome {
      root: root_copy,
      copied,
    })
  }

  /// Point ids stored inside copied resources at their copies: splitter rule
  /// destinations and sink references to dependent sources.
  fn remap_copied(
    &mut self,
    mapping: &HashMap<ResourceRef, ResourceRef>,
    pruned: &[(ResourceRef, u64)],
  ) -> Result<(), GraphError> {
    let splitter_operation = self.config.splitter_operation.clone();
    let keys = self.config.dependent_source_keys.clone();

    for new_ref in mapping.values().copied() {
      match new_ref.kind {
        ResourceKind::Set => {
          let Some(mut transform) = self.topology.set(new_ref.id).and_then(|s| s.transform.clone())
          else {
            continue;
          };
          let Some(mut spec) = transform.splitter_spec(&splitter_operation)? else {
            continue;
          };
          for destination in spec.destinations_mut() {
            if let Some(id) = destination.data_set_id {
              destination.data_set_id = mapping.get(&ResourceRef::set(id)).map(|copy| copy.id);
            }
          }
          transform.set_splitter_spec(&spec)?;
          if let Some(set) = self.topology.set_mut(new_ref.id) {
            set.transform = Some(transform);
          }
        }
        ResourceKind::Sink => {
          let dropped: Vec<u64> = pruned
            .iter()
            .filter(|(sink, _)| *sink == new_ref)
            .map(|(_, source)| *source)
            .collect();
          let Some(Resource::Sink(sink)) = self.topology.resource_mut(new_ref) else {
            continue;
          };
          for key in &keys {
            let Some(old_id) = sink.config.get(key).and_then(serde_json::Value::as_u64) else {
              continue;
            };
            if dropped.contains(&old_id) {
              sink.config.remove(key);
            } else if let Some(copy) = mapping.get(&ResourceRef::source(old_id)) {
              sink.config.insert(key.clone(), copy.id.into());
            }
          }
        }
        ResourceKind::Source => {}
      }
    }
    Ok(())
  }

  /// Delete the flow below `r`, children before parents.
  pub(crate) fn destroy(
    &mut self,
    viewer: &Viewer,
    r: ResourceRef,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    let root = self.cascade_root(r, "destroy", |access, node| access.can_manage(node, viewer))?;
    let subtree = self.same_origin_subtree(root);
    let members: HashSet<NodeId> = subtree.iter().copied().collect();

    let active = self.active_members(&subtree)?;
    if !active.is_empty() {
      return Err(GraphError::conflict(
        format!("cannot destroy {}: {} active resources", r, active.len()),
        active,
      ));
    }

    let dependents: Vec<ResourceRef> = subtree
      .iter()
      .flat_map(|id| self.topology.children(*id))
      .filter(|child| !members.contains(&child.id))
      .map(|child| child.resource)
      .collect();
    if !dependents.is_empty() {
      return Err(GraphError::conflict(
        format!("cannot destroy {}: other flows depend on it", r),
        dependents,
      ));
    }

    let mut edge_blockers = Vec::new();
    let mut edge_ids = Vec::new();
    for node_id in &subtree {
      let triggers = self.topology.triggers().filter(|t| t.involves(*node_id));
      let links = self.topology.links().filter(|l| l.involves(*node_id));
      let ids: Vec<String> = triggers
        .map(|t| format!("trigger:{}", t.id))
        .chain(links.map(|l| format!("link:{}", l.id)))
        .collect();
      if !ids.is_empty() {
        edge_blockers.push(self.node_resource(*node_id)?);
        edge_ids.extend(ids);
      }
    }
    if !edge_blockers.is_empty() {
      return Err(GraphError::conflict(
        format!("cannot destroy {}: referenced by {}", r, edge_ids.join(", ")),
        edge_blockers,
      ));
    }

    let destroyed = self.remove_subtree(&subtree)?;
    info!(resource = %r, count = destroyed.len(), "flow destroyed");
    Ok(destroyed)
  }

  /// Remove `r`'s subtree without precondition checks. Foreign-origin
  /// children are detached and edges touching removed nodes are dropped.
  pub(crate) fn force_destroy(&mut self, r: ResourceRef) -> Result<Vec<ResourceRef>, GraphError> {
    let root = self.topology.require_node_for(r)?.id;
    let subtree = self.same_origin_subtree(root);
    let members: HashSet<NodeId> = subtree.iter().copied().collect();

    let foreign: Vec<ResourceRef> = subtree
      .iter()
      .flat_map(|id| self.topology.children(*id))
      .filter(|child| !members.contains(&child.id))
      .map(|child| child.resource)
      .collect();
    for child in foreign {
      debug!(resource = %child, "detaching from destroyed parent");
      self.topology.require_resource_mut(child)?.set_declared_parent(None)?;
      self.reset(child)?;
      self.emit(child, EventType::Reparented);
    }

    let triggers: Vec<u64> = self
      .topology
      .triggers()
      .filter(|t| members.iter().any(|id| t.involves(*id)))
      .map(|t| t.id)
      .collect();
    for id in triggers {
      self.topology.remove_trigger(id);
    }
    let links: Vec<u64> = self
      .topology
      .links()
      .filter(|l| members.iter().any(|id| l.involves(*id)))
      .map(|l| l.id)
      .collect();
    for id in links {
      self.topology.remove_link(id);
    }

    self.remove_subtree(&subtree)
  }

  fn remove_subtree(&mut self, preorder: &[NodeId]) -> Result<Vec<ResourceRef>, GraphError> {
    let mut removed = Vec::with_capacity(preorder.len());
    for node_id in preorder.iter().rev() {
      let resource_ref = self.node_resource(*node_id)?;
      self.topology.remove_resource(resource_ref);
      self.emit(resource_ref, EventType::Destroyed);
      removed.push(resource_ref);
    }
    Ok(removed)
  }

  /// Transfer ownership of the flow below `r`. Nothing changes unless the new
  /// owner can read every credential and code container the flow uses.
  pub(crate) fn chown(
    &mut self,
    viewer: &Viewer,
    r: ResourceRef,
    owner_id: UserId,
    org_id: OrgId,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    let root = self.cascade_root(r, "transfer", |access, node| access.can_manage(node, viewer))?;
    let subtree = self.same_origin_subtree(root);

    let new_owner = Viewer::member(owner_id, org_id);
    let provider = self.provider();
    let can_read = |target| provider.has_role(target, &new_owner, Role::Collaborator);
    let mut missing = Vec::new();
    for node_id in &subtree {
      let resource = self.topology.require_resource(self.node_resource(*node_id)?)?;
      for target in resource.chown_preflight(&can_read) {
        if !missing.contains(&target) {
          missing.push(target);
        }
      }
    }
    if !missing.is_empty() {
      return Err(GraphError::MissingAccess { missing });
    }

    let mut changed = Vec::with_capacity(subtree.len());
    for node_id in &subtree {
      let resource_ref = self.node_resource(*node_id)?;
      self
        .topology
        .require_resource_mut(resource_ref)?
        .chown(owner_id, org_id);
      self.topology.set_node_owner(*node_id, owner_id, org_id);
      self.emit(resource_ref, EventType::OwnerChanged);
      changed.push(resource_ref);
    }

    // The new owner may sit on the other side of a sharing boundary.
    self.reset(r)?;
    info!(resource = %r, owner_id = %owner_id, count = changed.len(), "ownership transferred");
    Ok(changed)
  }
}
