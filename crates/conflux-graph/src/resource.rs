//! Resources and their graph hooks.

use serde::{Deserialize, Serialize};

use crate::error::{Fault, GraphError};
use crate::ids::{AccessTarget, OrgId, ProjectId, ResourceKind, ResourceRef, UserId};
use crate::node::ResourceStatus;
use crate::transform::Transform;

/// Ingestion endpoint. A source fed by a sink (`data_sink_id`) starts a
/// dependent flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
  pub id: u64,
  pub name: String,
  pub owner_id: UserId,
  pub org_id: OrgId,
  #[serde(default)]
  pub project_id: Option<ProjectId>,
  #[serde(default)]
  pub status: ResourceStatus,
  pub connector_type: String,
  #[serde(default)]
  pub data_sink_id: Option<u64>,
  #[serde(default)]
  pub credential_id: Option<u64>,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}

/// Transform stage. Exactly one of `data_source_id` / `parent_data_set_id`
/// is set once the set is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
  pub id: u64,
  pub name: String,
  pub owner_id: UserId,
  pub org_id: OrgId,
  #[serde(default)]
  pub project_id: Option<ProjectId>,
  #[serde(default)]
  pub status: ResourceStatus,
  #[serde(default)]
  pub data_source_id: Option<u64>,
  #[serde(default)]
  pub parent_data_set_id: Option<u64>,
  #[serde(default)]
  pub transform: Option<Transform>,
  #[serde(default)]
  pub code_container_id: Option<u64>,
  #[serde(default)]
  pub output_schema: serde_json::Value,
  #[serde(default)]
  pub samples: Vec<serde_json::Value>,
  #[serde(default)]
  pub cached_samples: Vec<serde_json::Value>,
}

/// Delivery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSink {
  pub id: u64,
  pub name: String,
  pub owner_id: UserId,
  pub org_id: OrgId,
  #[serde(default)]
  pub project_id: Option<ProjectId>,
  #[serde(default)]
  pub status: ResourceStatus,
  pub connector_type: String,
  #[serde(default)]
  pub data_set_id: Option<u64>,
  #[serde(default)]
  pub credential_id: Option<u64>,
  #[serde(default)]
  pub config: serde_json::Map<String, serde_json::Value>,
}

/// Closed union over the three resource kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
  Source(DataSource),
  Set(DataSet),
  Sink(DataSink),
}

macro_rules! common_field {
  ($self:ident, $field:ident) => {
    match $self {
      Resource::Source(r) => &r.$field,
      Resource::Set(r) => &r.$field,
      Resource::Sink(r) => &r.$field,
    }
  };
}

impl Resource {
  pub fn kind(&self) -> ResourceKind {
    match self {
      Resource::Source(_) => ResourceKind::Source,
      Resource::Set(_) => ResourceKind::Set,
      Resource::Sink(_) => ResourceKind::Sink,
    }
  }

  pub fn id(&self) -> u64 {
    *common_field!(self, id)
  }

  pub fn reference(&self) -> ResourceRef {
    ResourceRef::new(self.kind(), self.id())
  }

  pub fn name(&self) -> &str {
    common_field!(self, name)
  }

  pub fn owner_id(&self) -> UserId {
    *common_field!(self, owner_id)
  }

  pub fn org_id(&self) -> OrgId {
    *common_field!(self, org_id)
  }

  pub fn project_id(&self) -> Option<ProjectId> {
    *common_field!(self, project_id)
  }

  pub fn status(&self) -> ResourceStatus {
    *common_field!(self, status)
  }

  /// The parent recorded on the resource itself.
  ///
  /// This denormalized link must agree with the graph node's parent pointer.
  pub fn declared_parent(&self) -> Option<ResourceRef> {
    match self {
      Resource::Source(source) => source.data_sink_id.map(ResourceRef::sink),
      Resource::Set(set) => set
        .parent_data_set_id
        .map(ResourceRef::set)
        .or(set.data_source_id.map(ResourceRef::source)),
      Resource::Sink(sink) => sink.data_set_id.map(ResourceRef::set),
    }
  }

  /// Rewrite the denormalized parent link. Rejects parents of the wrong kind.
  pub fn set_declared_parent(&mut self, parent: Option<ResourceRef>) -> Result<(), GraphError> {
    let own = self.reference();
    let invalid = |parent: ResourceRef| {
      GraphError::bad_request(format!("{} cannot be a parent of {}", parent, own))
    };

    match self {
      Resource::Source(source) => match parent {
        None => source.data_sink_id = None,
        Some(p) if p.kind == ResourceKind::Sink => source.data_sink_id = Some(p.id),
        Some(p) => return Err(invalid(p)),
      },
      Resource::Set(set) => match parent {
        None => {
          set.data_source_id = None;
          set.parent_data_set_id = None;
        }
        Some(p) if p.kind == ResourceKind::Source => {
          set.data_source_id = Some(p.id);
          set.parent_data_set_id = None;
        }
        Some(p) if p.kind == ResourceKind::Set => {
          set.data_source_id = None;
          set.parent_data_set_id = Some(p.id);
        }
        Some(p) => return Err(invalid(p)),
      },
      Resource::Sink(sink) => match parent {
        None => sink.data_set_id = None,
        Some(p) if p.kind == ResourceKind::Set => sink.data_set_id = Some(p.id),
        Some(p) => return Err(invalid(p)),
      },
    }

    Ok(())
  }

  pub fn set_status(&mut self, status: ResourceStatus) {
    match self {
      Resource::Source(r) => r.status = status,
      Resource::Set(r) => r.status = status,
      Resource::Sink(r) => r.status = status,
    }
  }

  /// Activation hook. A sink must be attached to a set before it can run.
  pub fn activate(&mut self) -> Result<(), GraphError> {
    if let Resource::Sink(sink) = self
      && sink.data_set_id.is_none()
    {
      return Err(GraphError::bad_request(format!(
        "sink {} has no data set to deliver",
        sink.id
      )));
    }
    self.set_status(ResourceStatus::Active);
    Ok(())
  }

  pub fn pause(&mut self) {
    self.set_status(ResourceStatus::Paused);
  }

  /// Deep copy under a new id and owner. The copy starts paused-at-init and
  /// detached; the caller re-links its parent.
  pub fn copy_as(
    &self,
    new_id: u64,
    owner_id: UserId,
    org_id: OrgId,
    name_suffix: &str,
  ) -> Resource {
    let mut copy = self.clone();
    match &mut copy {
      Resource::Source(r) => {
        r.id = new_id;
        r.name.push_str(name_suffix);
        r.owner_id = owner_id;
        r.org_id = org_id;
      }
      Resource::Set(r) => {
        r.id = new_id;
        r.name.push_str(name_suffix);
        r.owner_id = owner_id;
        r.org_id = org_id;
      }
      Resource::Sink(r) => {
        r.id = new_id;
        r.name.push_str(name_suffix);
        r.owner_id = owner_id;
        r.org_id = org_id;
      }
    }
    copy.set_status(ResourceStatus::Init);
    copy
  }

  /// Non-topology resources this one depends on (credentials, code).
  pub fn dependencies(&self) -> Vec<AccessTarget> {
    match self {
      Resource::Source(r) => r.credential_id.map(AccessTarget::Credential).into_iter().collect(),
      Resource::Set(r) => r
        .code_container_id
        .map(AccessTarget::CodeContainer)
        .into_iter()
        .collect(),
      Resource::Sink(r) => r.credential_id.map(AccessTarget::Credential).into_iter().collect(),
    }
  }

  /// Ownership-transfer pre-flight: dependencies the new owner cannot read.
  pub fn chown_preflight(&self, can_read: &dyn Fn(AccessTarget) -> bool) -> Vec<AccessTarget> {
    self
      .dependencies()
      .into_iter()
      .filter(|target| !can_read(*target))
      .collect()
  }

  pub fn chown(&mut self, owner_id: UserId, org_id: OrgId) {
    match self {
      Resource::Source(r) => {
        r.owner_id = owner_id;
        r.org_id = org_id;
      }
      Resource::Set(r) => {
        r.owner_id = owner_id;
        r.org_id = org_id;
      }
      Resource::Sink(r) => {
        r.owner_id = owner_id;
        r.org_id = org_id;
      }
    }
  }

  /// Require this resource to be of `kind`.
  pub fn expect_kind(&self, kind: ResourceKind) -> Result<(), Fault> {
    if self.kind() == kind {
      Ok(())
    } else {
      Err(Fault::WrongResourceKind {
        expected: kind,
        actual: self.reference(),
      })
    }
  }
}
