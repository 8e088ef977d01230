//! Splitter branch management.
//!
//! A set whose transform leads with the splitter operation routes records to
//! child sets named by its rules plus an optional fallback. Those children
//! ("branches") exist only through the rules: they are created and destroyed
//! here, in the same transaction as the rule change.

use std::collections::BTreeSet;

use conflux_graph::{DataSet, Fallback, GraphError, Resource, ResourceKind, ResourceRef, Transform};
use tracing::{debug, info};

use crate::access::Viewer;
use crate::engine::Transaction;
use crate::events::EventType;

const FALLBACK_BRANCH_NAME: &str = "fallback";

impl Transaction<'_> {
  pub(crate) fn is_splitter(&self, set_id: u64) -> bool {
    self
      .topology
      .set(set_id)
      .and_then(|set| set.transform.as_ref())
      .is_some_and(|t| t.is_splitter(&self.config.splitter_operation))
  }

  /// Whether `r` is a set whose parent is a splitter.
  pub(crate) fn is_branch(&self, r: ResourceRef) -> bool {
    r.kind == ResourceKind::Set
      && self
        .topology
        .set(r.id)
        .and_then(|set| set.parent_data_set_id)
        .is_some_and(|parent| self.is_splitter(parent))
  }

  fn child_set_ids(&self, set_id: u64) -> BTreeSet<u64> {
    self
      .topology
      .structural_children(ResourceRef::set(set_id))
      .into_iter()
      .filter(|r| r.kind == ResourceKind::Set)
      .map(|r| r.id)
      .collect()
  }

  pub(crate) fn update_transform(
    &mut self,
    viewer: &Viewer,
    set_id: u64,
    transform: Option<Transform>,
  ) -> Result<DataSet, GraphError> {
    let r = ResourceRef::set(set_id);
    self.topology.require_resource(r)?;
    let node = self.topology.require_node_for(r)?;
    if !self.access().can_write(node, viewer) {
      return Err(GraphError::forbidden(format!("cannot edit {}", r)));
    }

    self.apply_transform(set_id, transform)?;
    self.emit(r, EventType::TransformUpdated);
    self
      .topology
      .set(set_id)
      .cloned()
      .ok_or_else(|| GraphError::not_found(r))
  }

  /// Store a new transform and reconcile branch children with its rules.
  pub(crate) fn apply_transform(
    &mut self,
    set_id: u64,
    transform: Option<Transform>,
  ) -> Result<(), GraphError> {
    let was_splitter = self.is_splitter(set_id);

    let Some(mut transform) = transform else {
      if was_splitter {
        self.drop_branches(set_id, &BTreeSet::new())?;
      }
      return self.store_transform(set_id, None);
    };
    let Some(mut spec) = transform.splitter_spec(&self.config.splitter_operation)? else {
      if was_splitter {
        self.drop_branches(set_id, &BTreeSet::new())?;
      }
      return self.store_transform(set_id, Some(transform));
    };

    let limit = self.config.max_splitter_rules;
    if spec.rules.len() > limit {
      return Err(GraphError::RuleLimitExceeded {
        limit,
        requested: spec.rules.len(),
      });
    }

    let existing = self.child_set_ids(set_id);
    let mut referenced = BTreeSet::new();
    for id in spec.referenced_ids() {
      if !referenced.insert(id) {
        return Err(GraphError::bad_request(format!(
          "set {} is the destination of more than one rule",
          id
        )));
      }
      if !existing.contains(&id) {
        return Err(GraphError::bad_request(format!(
          "set {} is not a branch of splitter {}",
          id, set_id
        )));
      }
    }

    // A plain set becomes a splitter only if its rules adopt every child.
    if !was_splitter {
      let unadopted: Vec<ResourceRef> = self
        .topology
        .structural_children(ResourceRef::set(set_id))
        .into_iter()
        .filter(|child| child.kind != ResourceKind::Set || !referenced.contains(&child.id))
        .collect();
      if !unadopted.is_empty() {
        return Err(GraphError::conflict(
          format!(
            "set {} has {} children its rules do not reference",
            set_id,
            unadopted.len()
          ),
          unadopted,
        ));
      }
    }

    self.drop_branches(set_id, &referenced)?;

    for rule in spec.rules.iter_mut() {
      if rule.destination.data_set_id.is_none() {
        let name = rule
          .destination
          .name
          .clone()
          .unwrap_or_else(|| rule.name.clone());
        rule.destination.data_set_id = Some(self.create_branch(set_id, name)?);
      }
    }
    if let Fallback::DataSet(destination) = &mut spec.fallback
      && destination.data_set_id.is_none()
    {
      let name = destination
        .name
        .clone()
        .unwrap_or_else(|| FALLBACK_BRANCH_NAME.to_string());
      destination.data_set_id = Some(self.create_branch(set_id, name)?);
    }

    transform.set_splitter_spec(&spec)?;
    info!(
      splitter = set_id,
      rules = spec.rules.len(),
      branches = spec.referenced_ids().len(),
      "splitter rules applied"
    );
    self.store_transform(set_id, Some(transform))
  }

  fn store_transform(
    &mut self,
    set_id: u64,
    transform: Option<Transform>,
  ) -> Result<(), GraphError> {
    let set = self
      .topology
      .set_mut(set_id)
      .ok_or_else(|| GraphError::not_found(ResourceRef::set(set_id)))?;
    set.transform = transform;
    Ok(())
  }

  /// Force-destroy every child set of `set_id` not in `keep`. Nothing is
  /// dropped while any of those subtrees is still running.
  fn drop_branches(&mut self, set_id: u64, keep: &BTreeSet<u64>) -> Result<(), GraphError> {
    let stale: Vec<u64> = self
      .child_set_ids(set_id)
      .into_iter()
      .filter(|id| !keep.contains(id))
      .collect();

    let mut active = Vec::new();
    for id in &stale {
      let root = self.topology.require_node_for(ResourceRef::set(*id))?.id;
      active.extend(self.active_members(&self.same_origin_subtree(root))?);
    }
    if !active.is_empty() {
      return Err(GraphError::conflict(
        format!(
          "splitter {} would drop {} active resources; pause them first",
          set_id,
          active.len()
        ),
        active,
      ));
    }

    for id in stale {
      debug!(splitter = set_id, branch = id, "dropping unreferenced branch");
      self.force_destroy(ResourceRef::set(id))?;
    }
    Ok(())
  }

  /// Create a branch set under a splitter. Branches inherit the splitter's
  /// owner, project, status, and schema.
  fn create_branch(&mut self, splitter_id: u64, name: String) -> Result<u64, GraphError> {
    let splitter = self
      .topology
      .set(splitter_id)
      .ok_or_else(|| GraphError::not_found(ResourceRef::set(splitter_id)))?;
    let mut branch = DataSet {
      id: 0,
      name,
      owner_id: splitter.owner_id,
      org_id: splitter.org_id,
      project_id: splitter.project_id,
      status: splitter.status,
      data_source_id: None,
      parent_data_set_id: Some(splitter_id),
      transform: None,
      code_container_id: None,
      output_schema: splitter.output_schema.clone(),
      samples: Vec::new(),
      cached_samples: Vec::new(),
    };
    branch.id = self.topology.allocate_resource_id(ResourceKind::Set);
    let id = branch.id;
    self.insert_and_build(Resource::Set(branch))?;
    Ok(id)
  }

  /// Store samples on a set. On a splitter, each branch's cached samples are
  /// recomputed from the samples tagged with its id.
  pub(crate) fn update_samples(
    &mut self,
    viewer: &Viewer,
    set_id: u64,
    samples: Vec<serde_json::Value>,
  ) -> Result<(), GraphError> {
    let r = ResourceRef::set(set_id);
    self.topology.require_resource(r)?;
    let node = self.topology.require_node_for(r)?;
    if !self.access().can_write(node, viewer) {
      return Err(GraphError::forbidden(format!("cannot edit {}", r)));
    }

    if self.is_splitter(set_id) {
      let tag = self.config.routing_tag_field.clone();
      for branch_id in self.child_set_ids(set_id) {
        let routed: Vec<serde_json::Value> = samples
          .iter()
          .filter(|sample| routes_to(sample, &tag, branch_id))
          .map(|sample| strip_tag(sample, &tag))
          .collect();
        if let Some(branch) = self.topology.set_mut(branch_id) {
          branch.cached_samples = routed;
        }
      }
    }

    let set = self
      .topology
      .set_mut(set_id)
      .ok_or_else(|| GraphError::not_found(r))?;
    set.samples = samples;
    Ok(())
  }
}

fn routes_to(sample: &serde_json::Value, tag: &str, set_id: u64) -> bool {
  sample.get(tag).is_some_and(|value| {
    value.as_u64() == Some(set_id)
      || value.as_str().and_then(|s| s.parse::<u64>().ok()) == Some(set_id)
  })
}

fn strip_tag(sample: &serde_json::Value, tag: &str) -> serde_json::Value {
  let mut sample = sample.clone();
  if let Some(object) = sample.as_object_mut() {
    object.remove(tag);
  }
  sample
}
