//! Batch files for `conflux apply`.
//!
//! A batch is a JSON array of operations, applied in order:
//!
//! ```json
//! [
//!   { "op": "create_source", "name": "orders", "connector_type": "s3" },
//!   { "op": "create_set", "name": "cleaned", "parent": { "kind": "source", "id": 1 } },
//!   { "op": "activate", "resource": { "kind": "source", "id": 1 } }
//! ]
//! ```

use anyhow::{Context, Result};
use conflux_engine::{
  CopyOptions, NewFlowLink, NewSet, NewSink, NewSource, NewTrigger, TopologyEngine, Viewer,
};
use conflux_graph::{OrgId, ResourceRef, Transform, UserId};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
  CreateProject {
    name: String,
  },
  CreateSource(NewSource),
  CreateSet(NewSet),
  CreateSink(NewSink),
  Reparent {
    resource: ResourceRef,
    #[serde(default)]
    parent: Option<ResourceRef>,
  },
  Activate {
    resource: ResourceRef,
  },
  Pause {
    resource: ResourceRef,
  },
  Copy {
    resource: ResourceRef,
    #[serde(default)]
    options: CopyOptions,
  },
  Destroy {
    resource: ResourceRef,
  },
  Chown {
    resource: ResourceRef,
    owner_id: UserId,
    org_id: OrgId,
  },
  UpdateTransform {
    data_set_id: u64,
    #[serde(default)]
    transform: Option<Transform>,
  },
  UpdateSamples {
    data_set_id: u64,
    samples: Vec<Value>,
  },
  CreateTrigger(NewTrigger),
  UpdateTrigger {
    trigger_id: u64,
    #[serde(flatten)]
    trigger: NewTrigger,
  },
  DeleteTrigger {
    trigger_id: u64,
  },
  CreateLink(NewFlowLink),
  DeleteLink {
    link_id: u64,
  },
}

impl Operation {
  fn name(&self) -> &'static str {
    match self {
      Operation::CreateProject { .. } => "create_project",
      Operation::CreateSource(_) => "create_source",
      Operation::CreateSet(_) => "create_set",
      Operation::CreateSink(_) => "create_sink",
      Operation::Reparent { .. } => "reparent",
      Operation::Activate { .. } => "activate",
      Operation::Pause { .. } => "pause",
      Operation::Copy { .. } => "copy",
      Operation::Destroy { .. } => "destroy",
      Operation::Chown { .. } => "chown",
      Operation::UpdateTransform { .. } => "update_transform",
      Operation::UpdateSamples { .. } => "update_samples",
      Operation::CreateTrigger(_) => "create_trigger",
      Operation::UpdateTrigger { .. } => "update_trigger",
      Operation::DeleteTrigger { .. } => "delete_trigger",
      Operation::CreateLink(_) => "create_link",
      Operation::DeleteLink { .. } => "delete_link",
    }
  }
}

pub fn parse(content: &str) -> Result<Vec<Operation>> {
  serde_json::from_str(content).context("failed to parse batch")
}

/// Apply one operation and return its result as JSON.
pub fn apply(engine: &mut TopologyEngine, viewer: &Viewer, op: Operation) -> Result<Value> {
  let name = op.name();
  let value = match op {
    Operation::CreateProject { name } => {
      serde_json::to_value(engine.create_project(viewer, &name)?)?
    }
    Operation::CreateSource(new) => serde_json::to_value(engine.create_source(viewer, new)?)?,
    Operation::CreateSet(new) => serde_json::to_value(engine.create_set(viewer, new)?)?,
    Operation::CreateSink(new) => serde_json::to_value(engine.create_sink(viewer, new)?)?,
    Operation::Reparent { resource, parent } => {
      engine.reparent(viewer, resource, parent)?;
      Value::Null
    }
    Operation::Activate { resource } => serde_json::to_value(engine.activate(viewer, resource)?)?,
    Operation::Pause { resource } => serde_json::to_value(engine.pause(viewer, resource)?)?,
    Operation::Copy { resource, options } => {
      serde_json::to_value(engine.copy(viewer, resource, options)?)?
    }
    Operation::Destroy { resource } => serde_json::to_value(engine.destroy(viewer, resource)?)?,
    Operation::Chown {
      resource,
      owner_id,
      org_id,
    } => serde_json::to_value(engine.chown(viewer, resource, owner_id, org_id)?)?,
    Operation::UpdateTransform {
      data_set_id,
      transform,
    } => serde_json::to_value(engine.update_transform(viewer, data_set_id, transform)?)?,
    Operation::UpdateSamples {
      data_set_id,
      samples,
    } => {
      engine.update_samples(viewer, data_set_id, samples)?;
      Value::Null
    }
    Operation::CreateTrigger(new) => serde_json::to_value(engine.create_trigger(viewer, new)?)?,
    Operation::UpdateTrigger {
      trigger_id,
      trigger,
    } => serde_json::to_value(engine.update_trigger(viewer, trigger_id, trigger)?)?,
    Operation::DeleteTrigger { trigger_id } => {
      engine.delete_trigger(viewer, trigger_id)?;
      Value::Null
    }
    Operation::CreateLink(new) => serde_json::to_value(engine.create_link(viewer, new)?)?,
    Operation::DeleteLink { link_id } => {
      engine.delete_link(viewer, link_id)?;
      Value::Null
    }
  };
  info!(op = name, "operation applied");
  Ok(value)
}

/// Apply every operation in order, stopping at the first failure.
pub fn apply_all(
  engine: &mut TopologyEngine,
  viewer: &Viewer,
  operations: Vec<Operation>,
) -> Result<Vec<Value>> {
  let mut results = Vec::with_capacity(operations.len());
  for (index, op) in operations.into_iter().enumerate() {
    let name = op.name();
    let result = apply(engine, viewer, op)
      .with_context(|| format!("operation {} ({}) failed", index, name))?;
    results.push(result);
  }
  Ok(results)
}
