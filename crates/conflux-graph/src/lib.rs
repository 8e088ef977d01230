//! Conflux Graph
//!
//! The topology data model: one [`GraphNode`] per resource, linked by
//! parent/origin/shared-origin pointers, plus the cross-flow edges
//! ([`TriggerEdge`], [`FlowLink`]) that live outside the tree.
//!
//! Everything is stored in an id-keyed arena ([`Topology`]). Nodes never hold
//! references to each other; traversal is always an explicit lookup by id.
//!
//! Resources are a closed tagged union ([`Resource`]) over the three node
//! kinds. Each variant implements the resource hooks the engine drives during
//! cascades (declared parent, activate/pause, copy, chown pre-flight).

mod edges;
mod error;
mod ids;
mod node;
mod resource;
mod topology;
mod transform;

pub use edges::{FlowLink, LinkType, Project, TriggerEdge, TriggeredEvent, TriggeringEvent};
pub use error::{Fault, GraphError};
pub use ids::{AccessTarget, NodeId, OrgId, ProjectId, ResourceKind, ResourceRef, UserId};
pub use node::{GraphNode, ResourceStatus};
pub use resource::{DataSet, DataSink, DataSource, Resource};
pub use topology::Topology;
pub use transform::{
  Destination, Fallback, SplitterRule, SplitterSpec, Transform, TransformOperation,
};
