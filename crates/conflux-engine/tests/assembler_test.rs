//! Flow assembly, sharing boundaries, and listing.

mod common;

use std::sync::Arc;

use common::*;
use conflux_config::ConnectorCategory;
use conflux_engine::{
  Doc, InMemoryDocs, InMemoryTags, NewSource, NewTrigger, Role, StaticAccess, TopologyEngine,
  Viewer,
};
use conflux_graph::{
  AccessTarget, GraphError, OrgId, ResourceRef, TriggeredEvent, TriggeringEvent, UserId,
};

fn carol() -> Viewer {
  Viewer::member(UserId(3), OrgId(2))
}

/// X is alice's set in org 1; Y is carol's set in org 2 derived from it.
struct Shared {
  engine: TopologyEngine,
  pipeline: Pipeline,
  y: ResourceRef,
}

fn shared(extra: impl FnOnce(&mut StaticAccess, &Pipeline)) -> Shared {
  let mut seed = engine();
  let pipeline = pipeline(&mut seed, &alice());

  let mut access = StaticAccess::new();
  access.grant(AccessTarget::Resource(pipeline.first), carol().user_id, Role::Sharer);
  extra(&mut access, &pipeline);
  let mut engine = engine_with(access).with_topology(seed.into_topology());

  let y = ResourceRef::set(set_under(&mut engine, &carol(), pipeline.first, "partner feed").id);
  Shared { engine, pipeline, y }
}

#[test]
fn test_single_flow_buckets_and_tree() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());

  let result = engine.flow(&alice(), p.second).unwrap();
  assert_eq!(result.flows.len(), 1);
  assert_eq!(result.flows[0].resources(), vec![p.source, p.first, p.second, p.sink]);
  assert_eq!(result.data_sources.len(), 1);
  assert_eq!(result.data_sets.len(), 2);
  assert_eq!(result.data_sinks.len(), 1);

  let sink = result.entry(p.sink).unwrap();
  assert_eq!(sink.access_role, Some(Role::Owner));
  assert_eq!(sink.connector_category, Some(ConnectorCategory::Database));
  assert_eq!(result.entry(p.first).unwrap().connector_category, None);
}

#[test]
fn test_unreadable_flow_is_forbidden() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let err = engine.flow(&bob(), p.source).unwrap_err();
  assert!(matches!(err, GraphError::Forbidden { .. }));
}

#[test]
fn test_sharer_in_other_org_crosses_boundary() {
  let dave = Viewer::member(UserId(4), OrgId(2));
  let Shared {
    engine,
    pipeline: p,
    y,
  } = shared(|access, p| {
    access.grant(AccessTarget::Resource(p.first), UserId(4), Role::Sharer);
  });

  let y_node = engine.topology().node_for(y).unwrap();
  assert!(y_node.is_origin());
  assert_eq!(
    y_node.shared_origin_node_id,
    engine.topology().node_for(p.source).map(|n| n.origin_node_id)
  );

  let result = engine.flow(&dave, p.first).unwrap();
  assert!(result.contains(y));
  assert!(result.flows[0].resources().contains(&y));
}

#[test]
fn test_collaborator_in_owning_org_stops_at_boundary() {
  let erin = Viewer::member(UserId(5), OrgId(1));
  let Shared {
    engine,
    pipeline: p,
    y,
  } = shared(|access, p| {
    access.grant(AccessTarget::Resource(p.first), UserId(5), Role::Collaborator);
  });

  let result = engine.flow(&erin, p.first).unwrap();
  assert!(result.contains(p.sink));
  assert!(!result.contains(y));
}

#[test]
fn test_upward_walk_stops_at_boundary() {
  let Shared {
    engine,
    pipeline: p,
    y,
  } = shared(|_, _| {});

  // Super users see past the boundary; an admin of the derived org does not.
  let result = engine.flow(&Viewer::super_user(UserId(9), OrgId(9)), y).unwrap();
  assert!(result.contains(p.source));

  let frank = Viewer::org_admin(UserId(6), OrgId(2));
  let result = engine.flow(&frank, y).unwrap();
  assert_eq!(result.flows[0].resource, y);
  assert!(!result.contains(p.first));
}

#[test]
fn test_tags_docs_and_projects_attached() {
  let tags = Arc::new(InMemoryTags::new());
  let docs = Arc::new(InMemoryDocs::new());
  let mut engine = engine().with_tags(tags.clone()).with_docs(docs.clone());

  let project = engine.create_project(&alice(), "billing").unwrap();
  let src = engine
    .create_source(
      &alice(),
      NewSource {
        name: "invoices".to_string(),
        connector_type: "s3".to_string(),
        data_sink_id: None,
        credential_id: None,
        project_id: Some(project.id),
        config: Default::default(),
      },
    )
    .unwrap();
  let r = ResourceRef::source(src.id);
  let origin = engine.topology().node_for(r).unwrap().origin_node_id;
  tags.tag(r, "pii");
  docs.link(
    origin,
    Doc {
      id: 1,
      title: "Runbook".to_string(),
      url: None,
    },
  );

  let result = engine.flow(&alice(), r).unwrap();
  assert_eq!(result.entry(r).unwrap().tags, vec!["pii".to_string()]);
  assert_eq!(result.flows[0].docs.len(), 1);
  assert_eq!(result.projects, vec![project]);

  let mut access = StaticAccess::new();
  access.grant(AccessTarget::Resource(r), UserId(2), Role::Collaborator);
  let engine = engine_with(access).with_topology(engine.into_topology());
  let result = engine.flow(&bob(), r).unwrap();
  assert_eq!(result.entry(r).unwrap().access_role, Some(Role::Collaborator));
  assert!(result.projects.is_empty());
}

#[test]
fn test_many_roots_merge() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let other = ResourceRef::source(source(&mut engine, &alice(), "events").id);
  engine
    .create_trigger(
      &alice(),
      NewTrigger {
        triggering: p.sink,
        triggered: other,
        triggering_event: TriggeringEvent::DataSinkWriteDone,
        triggered_event: TriggeredEvent::DataSourceRead,
      },
    )
    .unwrap();

  let result = engine.flows(&alice(), &[p.first, p.sink, other]).unwrap();
  assert_eq!(result.flows.len(), 2);
  assert_eq!(result.flows[0].resources().len(), 4);
  assert_eq!(result.data_sources.len(), 2);
  assert_eq!(result.data_sets.len(), 2);
  assert_eq!(result.triggers.len(), 1);
}

#[test]
fn test_list_flows() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let other = source(&mut engine, &alice(), "events");
  let standalone = set_under(&mut engine, &alice(), ResourceRef::source(other.id), "rows");
  engine
    .reparent(&alice(), ResourceRef::set(standalone.id), None)
    .unwrap();

  let all = engine.list_flows(&alice(), None).unwrap();
  assert_eq!(all.flows.len(), 3);
  assert_eq!(all.len(), 6);

  let filtered = engine.list_flows(&alice(), Some(&[p.source.id])).unwrap();
  assert_eq!(filtered.flows.len(), 1);
  assert_eq!(filtered.flows[0].resource, p.source);

  assert!(engine.list_flows(&bob(), None).unwrap().is_empty());
}

#[test]
fn test_list_never_repeats_a_resource() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let late = source(&mut engine, &alice(), "late");
  let mid = engine
    .create_source(
      &alice(),
      NewSource {
        name: "replica".to_string(),
        connector_type: "postgres".to_string(),
        data_sink_id: Some(p.sink.id),
        credential_id: None,
        project_id: None,
        config: Default::default(),
      },
    )
    .unwrap();
  let rows = set_under(&mut engine, &alice(), ResourceRef::source(mid.id), "replica rows");
  let mid_sink = sink_under(&mut engine, &alice(), rows.id, "postgres");
  engine
    .reparent(&alice(), ResourceRef::source(late.id), Some(ResourceRef::sink(mid_sink.id)))
    .unwrap();

  // `late` has the lower node id but sits below `mid`.
  let listed = engine.list_flows(&alice(), Some(&[late.id, mid.id])).unwrap();
  assert_eq!(listed.flows.len(), 1);
  assert_eq!(listed.flows[0].resource, ResourceRef::source(mid.id));
  assert_eq!(listed.data_sources.len(), 2);
  assert_eq!(listed.len(), 4);
}

#[test]
fn test_list_nests_reachable_shared_derivations() {
  let Shared {
    engine,
    pipeline: p,
    y,
  } = shared(|_, _| {});

  let admin = Viewer::super_user(UserId(9), OrgId(9));
  let listed = engine.list_flows(&admin, None).unwrap();
  assert_eq!(listed.flows.len(), 1);
  assert!(listed.flows[0].resources().contains(&y));

  let listed = engine.list_flows(&carol(), None).unwrap();
  assert_eq!(listed.flows.len(), 1);
  assert_eq!(listed.flows[0].resource, y);
  assert!(!listed.contains(p.source));
}
