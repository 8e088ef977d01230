#![allow(dead_code)]

use std::sync::Arc;

use conflux_config::{ConnectorCategory, ConnectorSpec, EngineConfig};
use conflux_engine::{
  AccessProvider, NewSet, NewSink, NewSource, StaticAccess, TopologyEngine, Viewer,
};
use conflux_graph::{DataSet, DataSink, DataSource, OrgId, ResourceRef, Transform, UserId};
use serde_json::json;

pub fn config() -> EngineConfig {
  EngineConfig {
    connectors: vec![
      ConnectorSpec {
        connector_type: "s3".to_string(),
        category: ConnectorCategory::File,
        supports_dependent_flow: false,
      },
      ConnectorSpec {
        connector_type: "postgres".to_string(),
        category: ConnectorCategory::Database,
        supports_dependent_flow: true,
      },
    ],
    ..EngineConfig::default()
  }
}

pub fn engine() -> TopologyEngine {
  engine_with(StaticAccess::new())
}

pub fn engine_with(access: StaticAccess) -> TopologyEngine {
  let access: Arc<dyn AccessProvider> = Arc::new(access);
  TopologyEngine::new(Arc::new(config()), access)
}

pub fn alice() -> Viewer {
  Viewer::member(UserId(1), OrgId(1))
}

pub fn bob() -> Viewer {
  Viewer::member(UserId(2), OrgId(1))
}

pub fn source(engine: &mut TopologyEngine, viewer: &Viewer, name: &str) -> DataSource {
  engine
    .create_source(
      viewer,
      NewSource {
        name: name.to_string(),
        connector_type: "s3".to_string(),
        data_sink_id: None,
        credential_id: None,
        project_id: None,
        config: Default::default(),
      },
    )
    .expect("create source")
}

pub fn set_under(
  engine: &mut TopologyEngine,
  viewer: &Viewer,
  parent: ResourceRef,
  name: &str,
) -> DataSet {
  engine
    .create_set(
      viewer,
      NewSet {
        name: name.to_string(),
        parent,
        transform: None,
        code_container_id: None,
        output_schema: json!({ "type": "object" }),
        project_id: None,
      },
    )
    .expect("create set")
}

pub fn sink_under(
  engine: &mut TopologyEngine,
  viewer: &Viewer,
  set_id: u64,
  connector: &str,
) -> DataSink {
  engine
    .create_sink(
      viewer,
      NewSink {
        name: format!("{} sink", connector),
        connector_type: connector.to_string(),
        data_set_id: Some(set_id),
        credential_id: None,
        project_id: None,
        config: Default::default(),
      },
    )
    .expect("create sink")
}

/// source -> set -> set -> sink, all owned by `viewer`.
pub struct Pipeline {
  pub source: ResourceRef,
  pub first: ResourceRef,
  pub second: ResourceRef,
  pub sink: ResourceRef,
}

pub fn pipeline(engine: &mut TopologyEngine, viewer: &Viewer) -> Pipeline {
  let source = source(engine, viewer, "orders").id;
  let first = set_under(engine, viewer, ResourceRef::source(source), "cleaned").id;
  let second = set_under(engine, viewer, ResourceRef::set(first), "enriched").id;
  let sink = sink_under(engine, viewer, second, "postgres").id;
  Pipeline {
    source: ResourceRef::source(source),
    first: ResourceRef::set(first),
    second: ResourceRef::set(second),
    sink: ResourceRef::sink(sink),
  }
}

pub fn splitter(spec: serde_json::Value) -> Transform {
  serde_json::from_value(json!({
    "operations": [
      { "operation": "splitter", "spec": spec },
      { "operation": "project", "spec": { "fields": ["id"] } }
    ]
  }))
  .expect("splitter transform")
}

/// Ids of the child sets directly under `set_id`.
pub fn child_sets(engine: &TopologyEngine, set_id: u64) -> Vec<u64> {
  let mut ids: Vec<u64> = engine
    .topology()
    .structural_children(ResourceRef::set(set_id))
    .into_iter()
    .filter(|r| r.kind == conflux_graph::ResourceKind::Set)
    .map(|r| r.id)
    .collect();
  ids.sort();
  ids
}
