//! The transactional engine facade.

use std::sync::Arc;

use conflux_config::EngineConfig;
use conflux_graph::{
  DataSet, DataSink, DataSource, FlowLink, GraphError, OrgId, Project, ResourceRef, Topology,
  Transform, TriggerEdge, UserId,
};
use tracing::{debug, error, instrument, warn};

use crate::access::{AccessEvaluator, AccessProvider, Viewer};
use crate::assembler::{FlowAssembler, FlowResult};
use crate::builder::{NewSet, NewSink, NewSource};
use crate::events::{ControlPlaneEvent, ControlPlanePublisher, EventType, NoopPublisher};
use crate::lifecycle::{CopyOptions, CopyOutcome};
use crate::links::NewFlowLink;
use crate::providers::{DocProvider, InMemoryDocs, InMemoryTags, TagProvider};
use crate::triggers::NewTrigger;

/// Working state of one transaction.
///
/// Operations mutate a private copy of the topology. The engine swaps it in
/// on success and drops it on failure, so an aborted cascade leaves nothing
/// behind. Events are buffered until commit.
pub(crate) struct Transaction<'e> {
  pub(crate) topology: Topology,
  pub(crate) config: &'e EngineConfig,
  provider: &'e dyn AccessProvider,
  actor: Option<Viewer>,
  events: Vec<ControlPlaneEvent>,
}

impl<'e> Transaction<'e> {
  fn new(
    topology: Topology,
    config: &'e EngineConfig,
    provider: &'e dyn AccessProvider,
    actor: Option<Viewer>,
  ) -> Self {
    Self {
      topology,
      config,
      provider,
      actor,
      events: Vec::new(),
    }
  }

  pub(crate) fn access(&self) -> AccessEvaluator<'_> {
    AccessEvaluator::new(&self.topology, self.provider)
  }

  pub(crate) fn provider(&self) -> &'e dyn AccessProvider {
    self.provider
  }

  /// The viewer a resource owner acts as. Keeps the acting viewer's admin
  /// level when the owner is the one acting.
  pub(crate) fn owner_as_viewer(&self, owner_id: UserId, org_id: OrgId) -> Viewer {
    match self.actor {
      Some(actor) if actor.user_id == owner_id && actor.org_id == org_id => actor,
      _ => Viewer::member(owner_id, org_id),
    }
  }

  pub(crate) fn emit(&mut self, resource: ResourceRef, event_type: EventType) {
    self.events.push(ControlPlaneEvent {
      resource,
      event_type,
    });
  }

  fn finish(self) -> (Topology, Vec<ControlPlaneEvent>) {
    (self.topology, self.events)
  }
}

/// Owns the committed topology and runs every mutation as one transaction.
///
/// Share across tasks behind a `tokio::sync::Mutex`; exclusive access
/// serializes writers.
pub struct TopologyEngine {
  topology: Topology,
  config: Arc<EngineConfig>,
  access: Arc<dyn AccessProvider>,
  publisher: Arc<dyn ControlPlanePublisher>,
  tags: Arc<dyn TagProvider>,
  docs: Arc<dyn DocProvider>,
}

impl TopologyEngine {
  pub fn new(config: Arc<EngineConfig>, access: Arc<dyn AccessProvider>) -> Self {
    Self {
      topology: Topology::new(),
      config,
      access,
      publisher: Arc::new(NoopPublisher),
      tags: Arc::new(InMemoryTags::new()),
      docs: Arc::new(InMemoryDocs::new()),
    }
  }

  pub fn with_topology(mut self, topology: Topology) -> Self {
    self.topology = topology;
    self
  }

  pub fn with_publisher(mut self, publisher: Arc<dyn ControlPlanePublisher>) -> Self {
    self.publisher = publisher;
    self
  }

  pub fn with_tags(mut self, tags: Arc<dyn TagProvider>) -> Self {
    self.tags = tags;
    self
  }

  pub fn with_docs(mut self, docs: Arc<dyn DocProvider>) -> Self {
    self.docs = docs;
    self
  }

  pub fn topology(&self) -> &Topology {
    &self.topology
  }

  pub fn into_topology(self) -> Topology {
    self.topology
  }

  fn transaction<T>(
    &mut self,
    op: &'static str,
    actor: Option<&Viewer>,
    f: impl FnOnce(&mut Transaction<'_>) -> Result<T, GraphError>,
  ) -> Result<T, GraphError> {
    let mut tx = Transaction::new(
      self.topology.clone(),
      &self.config,
      self.access.as_ref(),
      actor.copied(),
    );
    match f(&mut tx) {
      Ok(value) => {
        let (topology, events) = tx.finish();
        self.topology = topology;
        debug!(op, events = events.len(), "transaction committed");
        self.publish(events);
        Ok(value)
      }
      Err(e) => {
        if e.is_fault() {
          error!(op, error = ?e, "transaction aborted by internal fault");
        } else {
          warn!(op, error = %e, "transaction rolled back");
        }
        Err(e)
      }
    }
  }

  fn publish(&self, events: Vec<ControlPlaneEvent>) {
    for event in events {
      if let Err(e) = self.publisher.publish(&event) {
        warn!(
          resource = %event.resource,
          event_type = ?event.event_type,
          error = %e,
          "failed to publish control plane event"
        );
      }
    }
  }

  fn assembler(&self) -> FlowAssembler<'_> {
    FlowAssembler::new(
      &self.topology,
      &self.config,
      self.access.as_ref(),
      self.tags.as_ref(),
      self.docs.as_ref(),
    )
  }

  // Creation and structure

  pub fn create_project(&mut self, viewer: &Viewer, name: &str) -> Result<Project, GraphError> {
    self.transaction("create_project", Some(viewer), |tx| {
      let project = Project {
        id: tx.topology.allocate_project_id(),
        name: name.to_string(),
        owner_id: viewer.user_id,
        org_id: viewer.org_id,
      };
      tx.topology.insert_project(project.clone());
      Ok(project)
    })
  }

  pub fn create_source(
    &mut self,
    viewer: &Viewer,
    new: NewSource,
  ) -> Result<DataSource, GraphError> {
    self.transaction("create_source", Some(viewer), |tx| tx.create_source(viewer, new))
  }

  pub fn create_set(&mut self, viewer: &Viewer, new: NewSet) -> Result<DataSet, GraphError> {
    self.transaction("create_set", Some(viewer), |tx| tx.create_set(viewer, new))
  }

  pub fn create_sink(&mut self, viewer: &Viewer, new: NewSink) -> Result<DataSink, GraphError> {
    self.transaction("create_sink", Some(viewer), |tx| tx.create_sink(viewer, new))
  }

  #[instrument(skip(self, viewer), fields(user_id = %viewer.user_id))]
  pub fn reparent(
    &mut self,
    viewer: &Viewer,
    resource: ResourceRef,
    parent: Option<ResourceRef>,
  ) -> Result<(), GraphError> {
    self.transaction("reparent", Some(viewer), |tx| tx.reparent(viewer, resource, parent))
  }

  /// Recompute graph pointers for `resource` and everything below it.
  pub fn repair(&mut self, resource: ResourceRef) -> Result<(), GraphError> {
    self.transaction("repair", None, |tx| tx.reset(resource))
  }

  // Cascades

  #[instrument(skip(self, viewer), fields(user_id = %viewer.user_id))]
  pub fn activate(
    &mut self,
    viewer: &Viewer,
    resource: ResourceRef,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    self.transaction("activate", Some(viewer), |tx| tx.activate(viewer, resource))
  }

  #[instrument(skip(self, viewer), fields(user_id = %viewer.user_id))]
  pub fn pause(
    &mut self,
    viewer: &Viewer,
    resource: ResourceRef,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    self.transaction("pause", Some(viewer), |tx| tx.pause(viewer, resource))
  }

  #[instrument(skip(self, viewer), fields(user_id = %viewer.user_id))]
  pub fn copy(
    &mut self,
    viewer: &Viewer,
    resource: ResourceRef,
    options: CopyOptions,
  ) -> Result<CopyOutcome, GraphError> {
    self.transaction("copy", Some(viewer), |tx| tx.copy(viewer, resource, options))
  }

  #[instrument(skip(self, viewer), fields(user_id = %viewer.user_id))]
  pub fn destroy(
    &mut self,
    viewer: &Viewer,
    resource: ResourceRef,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    self.transaction("destroy", Some(viewer), |tx| tx.destroy(viewer, resource))
  }

  #[instrument(skip(self, viewer), fields(user_id = %viewer.user_id))]
  pub fn chown(
    &mut self,
    viewer: &Viewer,
    resource: ResourceRef,
    owner_id: UserId,
    org_id: OrgId,
  ) -> Result<Vec<ResourceRef>, GraphError> {
    self.transaction("chown", Some(viewer), |tx| tx.chown(viewer, resource, owner_id, org_id))
  }

  // Splitters and samples

  #[instrument(skip(self, viewer, transform), fields(user_id = %viewer.user_id))]
  pub fn update_transform(
    &mut self,
    viewer: &Viewer,
    data_set_id: u64,
    transform: Option<Transform>,
  ) -> Result<DataSet, GraphError> {
    self.transaction("update_transform", Some(viewer), |tx| {
      tx.update_transform(viewer, data_set_id, transform)
    })
  }

  pub fn update_samples(
    &mut self,
    viewer: &Viewer,
    data_set_id: u64,
    samples: Vec<serde_json::Value>,
  ) -> Result<(), GraphError> {
    self.transaction("update_samples", Some(viewer), |tx| {
      tx.update_samples(viewer, data_set_id, samples)
    })
  }

  // Cross-flow edges

  pub fn create_trigger(
    &mut self,
    viewer: &Viewer,
    new: NewTrigger,
  ) -> Result<TriggerEdge, GraphError> {
    self.transaction("create_trigger", Some(viewer), |tx| tx.create_trigger(viewer, new))
  }

  pub fn update_trigger(
    &mut self,
    viewer: &Viewer,
    trigger_id: u64,
    new: NewTrigger,
  ) -> Result<TriggerEdge, GraphError> {
    self.transaction("update_trigger", Some(viewer), |tx| {
      tx.update_trigger(viewer, trigger_id, new)
    })
  }

  pub fn delete_trigger(&mut self, viewer: &Viewer, trigger_id: u64) -> Result<(), GraphError> {
    self.transaction("delete_trigger", Some(viewer), |tx| tx.delete_trigger(viewer, trigger_id))
  }

  pub fn create_link(&mut self, viewer: &Viewer, new: NewFlowLink) -> Result<FlowLink, GraphError> {
    self.transaction("create_link", Some(viewer), |tx| tx.create_link(viewer, new))
  }

  pub fn delete_link(&mut self, viewer: &Viewer, link_id: u64) -> Result<(), GraphError> {
    self.transaction("delete_link", Some(viewer), |tx| tx.delete_link(viewer, link_id))
  }

  /// Links touching the flow that contains `resource`.
  pub fn links_for(&self, resource: ResourceRef) -> Result<Vec<FlowLink>, GraphError> {
    crate::links::links_for(&self.topology, resource)
  }

  // Reads

  pub fn flow(&self, viewer: &Viewer, resource: ResourceRef) -> Result<FlowResult, GraphError> {
    self.assembler().assemble(viewer, resource)
  }

  pub fn flows(
    &self,
    viewer: &Viewer,
    resources: &[ResourceRef],
  ) -> Result<FlowResult, GraphError> {
    self.assembler().assemble_many(viewer, resources)
  }

  /// Every flow visible to `viewer`, optionally restricted to some sources.
  pub fn list_flows(
    &self,
    viewer: &Viewer,
    data_source_ids: Option<&[u64]>,
  ) -> Result<FlowResult, GraphError> {
    self.assembler().list(viewer, data_source_ids)
  }
}
