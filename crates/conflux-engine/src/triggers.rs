//! Trigger edges between flows and cycle detection over them.

use std::collections::{HashMap, HashSet};

use conflux_graph::{
  GraphError, NodeId, ResourceRef, Topology, TriggerEdge, TriggeredEvent, TriggeringEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::Viewer;
use crate::engine::Transaction;
use crate::events::EventType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrigger {
  pub triggering: ResourceRef,
  pub triggered: ResourceRef,
  pub triggering_event: TriggeringEvent,
  pub triggered_event: TriggeredEvent,
}

/// Search for a path from `edge`'s triggered origin back to its triggering
/// origin. Returns the edge ids along the cycle, starting with `edge` itself.
pub(crate) fn find_trigger_cycle(topology: &Topology, edge: &TriggerEdge) -> Option<Vec<u64>> {
  let mut adjacency: HashMap<NodeId, Vec<&TriggerEdge>> = HashMap::new();
  for trigger in topology.triggers() {
    adjacency
      .entry(trigger.triggering_origin_node_id)
      .or_default()
      .push(trigger);
  }

  let start = edge.triggered_origin_node_id;
  let target = edge.triggering_origin_node_id;
  let mut visited = HashSet::from([start]);
  let mut stack = vec![(start, vec![edge.id])];

  while let Some((node, chain)) = stack.pop() {
    for next in adjacency.get(&node).into_iter().flatten() {
      let to = next.triggered_origin_node_id;
      let mut extended = chain.clone();
      extended.push(next.id);
      if to == target {
        return Some(extended);
      }
      if visited.insert(to) {
        stack.push((to, extended));
      }
    }
  }
  None
}

impl Transaction<'_> {
  /// Origin of the flow containing `r`, if `viewer` may operate it.
  pub(crate) fn operable_origin(
    &self,
    viewer: &Viewer,
    r: ResourceRef,
  ) -> Result<NodeId, GraphError> {
    self.topology.require_resource(r)?;
    let node = self.topology.require_node_for(r)?;
    if !self.access().can_operate(node, viewer) {
      return Err(GraphError::forbidden(format!("cannot operate {}", r)));
    }
    Ok(node.origin_node_id)
  }

  fn require_operable_node(&self, viewer: &Viewer, id: NodeId) -> Result<ResourceRef, GraphError> {
    let node = self.topology.resolve(id, id)?;
    if !self.access().can_operate(node, viewer) {
      return Err(GraphError::forbidden(format!("cannot operate {}", node.resource)));
    }
    Ok(node.resource)
  }

  /// Validate and store a trigger under `id`, replacing any edge with that id.
  fn put_trigger(
    &mut self,
    viewer: &Viewer,
    id: u64,
    new: &NewTrigger,
  ) -> Result<TriggerEdge, GraphError> {
    let triggering = self.operable_origin(viewer, new.triggering)?;
    let triggered = self.operable_origin(viewer, new.triggered)?;
    if triggering == triggered {
      return Err(GraphError::bad_request(format!(
        "{} and {} belong to the same flow; a flow cannot trigger itself",
        new.triggering, new.triggered
      )));
    }

    let duplicate = self.topology.triggers().any(|t| {
      t.id != id
        && t.triggering_origin_node_id == triggering
        && t.triggered_origin_node_id == triggered
    });
    if duplicate {
      return Err(GraphError::conflict(
        format!("{} already triggers {}", new.triggering, new.triggered),
        vec![new.triggering, new.triggered],
      ));
    }

    let edge = TriggerEdge {
      id,
      owner_id: viewer.user_id,
      org_id: viewer.org_id,
      triggering_origin_node_id: triggering,
      triggered_origin_node_id: triggered,
      triggering_event: new.triggering_event,
      triggered_event: new.triggered_event,
    };
    self.topology.insert_trigger(edge.clone());

    if let Some(chain) = find_trigger_cycle(&self.topology, &edge) {
      debug!(trigger_id = id, ?chain, "trigger would close a cycle");
      return Err(GraphError::CycleDetected { chain });
    }
    Ok(edge)
  }

  pub(crate) fn create_trigger(
    &mut self,
    viewer: &Viewer,
    new: NewTrigger,
  ) -> Result<TriggerEdge, GraphError> {
    let id = self.topology.allocate_trigger_id();
    let edge = self.put_trigger(viewer, id, &new)?;
    self.emit(new.triggering, EventType::TriggerCreated);
    info!(
      trigger_id = id,
      triggering = %new.triggering,
      triggered = %new.triggered,
      "trigger created"
    );
    Ok(edge)
  }

  pub(crate) fn update_trigger(
    &mut self,
    viewer: &Viewer,
    trigger_id: u64,
    new: NewTrigger,
  ) -> Result<TriggerEdge, GraphError> {
    let existing = self
      .topology
      .trigger(trigger_id)
      .ok_or_else(|| GraphError::not_found(format!("trigger {}", trigger_id)))?;
    self.require_operable_node(viewer, existing.triggering_origin_node_id)?;

    let edge = self.put_trigger(viewer, trigger_id, &new)?;
    self.emit(new.triggering, EventType::TriggerUpdated);
    Ok(edge)
  }

  pub(crate) fn delete_trigger(
    &mut self,
    viewer: &Viewer,
    trigger_id: u64,
  ) -> Result<(), GraphError> {
    let existing = self
      .topology
      .trigger(trigger_id)
      .ok_or_else(|| GraphError::not_found(format!("trigger {}", trigger_id)))?;
    let resource = self.require_operable_node(viewer, existing.triggering_origin_node_id)?;

    self.topology.remove_trigger(trigger_id);
    self.emit(resource, EventType::TriggerDeleted);
    Ok(())
  }
}
