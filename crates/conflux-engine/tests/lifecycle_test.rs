//! Cascading activate, pause, copy, destroy, and ownership transfer.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use conflux_engine::{
  ChannelPublisher, CopyOptions, EventType, NewSource, NewTrigger, Role, StaticAccess,
};
use conflux_graph::{
  AccessTarget, GraphError, NodeId, OrgId, Resource, ResourceRef, ResourceStatus, TriggeredEvent,
  TriggeringEvent, UserId,
};
use serde_json::json;
use tokio::sync::mpsc;

fn status(engine: &conflux_engine::TopologyEngine, r: ResourceRef) -> ResourceStatus {
  engine.topology().resource(r).map(Resource::status).expect("resource")
}

#[test]
fn test_activate_and_pause_cascade() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());

  let touched = engine.activate(&alice(), p.source).unwrap();
  assert_eq!(touched, vec![p.source, p.first, p.second, p.sink]);
  for r in [p.source, p.first, p.second, p.sink] {
    assert_eq!(status(&engine, r), ResourceStatus::Active);
    assert_eq!(
      engine.topology().node_for(r).map(|n| n.status),
      Some(ResourceStatus::Active)
    );
  }

  let touched = engine.pause(&alice(), p.second).unwrap();
  assert_eq!(touched, vec![p.second, p.sink]);
  assert_eq!(status(&engine, p.first), ResourceStatus::Active);
  assert_eq!(status(&engine, p.sink), ResourceStatus::Paused);
}

#[test]
fn test_activate_requires_operator() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let err = engine.activate(&bob(), p.source).unwrap_err();
  assert!(matches!(err, GraphError::Forbidden { .. }));
  assert_eq!(status(&engine, p.source), ResourceStatus::Init);
}

#[test]
fn test_cascade_stops_at_dependent_flow() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let dependent = engine
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

  engine.activate(&alice(), p.source).unwrap();
  assert_eq!(
    status(&engine, ResourceRef::source(dependent.id)),
    ResourceStatus::Init
  );
}

#[tokio::test]
async fn test_events_published_after_commit() {
  let (sender, mut receiver) = mpsc::unbounded_channel();
  let mut engine = engine().with_publisher(Arc::new(ChannelPublisher::new(sender)));
  let p = pipeline(&mut engine, &alice());
  while receiver.try_recv().is_ok() {}

  engine.activate(&alice(), p.second).unwrap();
  let first = receiver.recv().await.unwrap();
  let second = receiver.recv().await.unwrap();
  assert_eq!(first.resource, p.second);
  assert_eq!(second.resource, p.sink);
  assert_eq!(first.event_type, EventType::Activated);

  // A rolled-back cascade publishes nothing.
  let _ = engine.destroy(&alice(), p.source).unwrap_err();
  assert!(receiver.try_recv().is_err());
}

#[test]
fn test_destroy_with_active_resource_leaves_store_unchanged() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  engine.activate(&alice(), p.second).unwrap();
  let before = engine.topology().node_count();

  let err = engine.destroy(&alice(), p.source).unwrap_err();
  match err {
    GraphError::Conflict { blocking_ids, .. } => {
      assert_eq!(blocking_ids, vec![p.second, p.sink]);
    }
    other => panic!("expected conflict, got {other:?}"),
  }
  assert_eq!(engine.topology().node_count(), before);
  assert!(engine.topology().resource(p.first).is_some());
}

#[test]
fn test_destroy_removes_subtree() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let keep = source(&mut engine, &alice(), "unrelated");

  let destroyed = engine.destroy(&alice(), p.first).unwrap();
  assert_eq!(destroyed, vec![p.sink, p.second, p.first]);
  assert_eq!(engine.topology().node_count(), 2);
  assert!(engine.topology().resource(p.source).is_some());
  assert!(engine.topology().resource(ResourceRef::source(keep.id)).is_some());
  assert!(engine.topology().structural_children(p.source).is_empty());
}

#[test]
fn test_destroy_refuses_when_other_flows_depend() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let dependent = engine
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

  let err = engine.destroy(&alice(), p.source).unwrap_err();
  assert_eq!(err.blocking_ids(), &[ResourceRef::source(dependent.id)]);
}

#[test]
fn test_destroy_refuses_with_triggers() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let other = source(&mut engine, &alice(), "downstream");
  engine
    .create_trigger(
      &alice(),
      NewTrigger {
        triggering: p.sink,
        triggered: ResourceRef::source(other.id),
        triggering_event: TriggeringEvent::DataSinkWriteDone,
        triggered_event: TriggeredEvent::DataSourceRead,
      },
    )
    .unwrap();

  let err = engine.destroy(&alice(), p.source).unwrap_err();
  assert_eq!(err.blocking_ids(), &[p.source]);
}

#[test]
fn test_copy_root_yields_disjoint_tree() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let original: HashSet<NodeId> = engine.topology().nodes().map(|n| n.id).collect();

  let outcome = engine
    .copy(&alice(), p.source, CopyOptions::default())
    .unwrap();
  assert_eq!(outcome.copied.len(), 4);
  assert_eq!(outcome.copied[0], (p.source, outcome.root));

  let topology = engine.topology();
  assert_eq!(topology.node_count(), 8);
  let new_nodes: Vec<_> = outcome
    .copied
    .iter()
    .map(|(_, copy)| topology.node_for(*copy).cloned().unwrap())
    .collect();
  let new_ids: HashSet<NodeId> = new_nodes.iter().map(|n| n.id).collect();
  assert!(new_ids.is_disjoint(&original));

  let root = &new_nodes[0];
  assert!(root.is_origin());
  for n in &new_nodes[1..] {
    assert_eq!(n.origin_node_id, root.id);
    assert!(new_ids.contains(&n.parent_node_id.unwrap()));
  }
  assert_eq!(
    topology.resource(outcome.root).map(|r| r.name().to_string()),
    Some("orders (copy)".to_string())
  );
}

#[test]
fn test_copy_of_set_stays_beside_original() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let outcome = engine.copy(&alice(), p.second, CopyOptions::default()).unwrap();

  let topology = engine.topology();
  let copy = topology.node_for(outcome.root).unwrap();
  assert_eq!(copy.parent_node_id, topology.node_for(p.first).map(|n| n.id));
  assert_eq!(outcome.copied.len(), 2);
}

#[test]
fn test_copy_of_splitter_points_rules_at_copied_branches() {
  let mut engine = engine();
  let src = source(&mut engine, &alice(), "orders");
  let router = set_under(&mut engine, &alice(), ResourceRef::source(src.id), "router").id;
  let eu = set_under(&mut engine, &alice(), ResourceRef::set(router), "eu").id;
  engine
    .update_transform(
      &alice(),
      router,
      Some(splitter(json!({
        "rules": [
          { "name": "eu", "destination": { "data_set_id": eu } },
          { "name": "us", "destination": { "name": "US" } }
        ],
        "fallback": { "action": "data_set" }
      }))),
    )
    .unwrap();

  let outcome = engine
    .copy(&alice(), ResourceRef::set(router), CopyOptions::default())
    .unwrap();
  assert_eq!(outcome.copied.len(), 4);

  let topology = engine.topology();
  let spec_of = |id: u64| {
    topology
      .set(id)
      .and_then(|s| s.transform.as_ref())
      .and_then(|t| t.splitter_spec("splitter").unwrap())
      .expect("splitter spec")
  };
  let original = spec_of(router).referenced_ids();
  let copied = spec_of(outcome.root.id).referenced_ids();
  assert_eq!(copied.len(), 3);

  for (before, after) in original.iter().zip(&copied) {
    assert_ne!(before, after);
    assert!(
      outcome
        .copied
        .contains(&(ResourceRef::set(*before), ResourceRef::set(*after)))
    );
  }
  let mut expected = copied.clone();
  expected.sort();
  assert_eq!(child_sets(&engine, outcome.root.id), expected);
}

#[test]
fn test_copy_prunes_dependent_flow_and_strips_keys() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let dependent = engine
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
  let mut topology = engine.into_topology();
  if let Some(Resource::Sink(stored)) = topology.resource_mut(p.sink) {
    stored.config.insert("data_source_id".to_string(), json!(dependent.id));
    stored.config.insert("table".to_string(), json!("orders"));
  }
  let mut engine = common::engine().with_topology(topology);

  let outcome = engine.copy(&alice(), p.source, CopyOptions::default()).unwrap();
  assert_eq!(outcome.copied.len(), 4);
  let (_, sink_copy) = outcome.copied[3];
  let Some(Resource::Sink(sink)) = engine.topology().resource(sink_copy) else {
    panic!("sink copy missing");
  };
  assert!(!sink.config.contains_key("data_source_id"));
  assert_eq!(sink.config.get("table"), Some(&json!("orders")));

  let outcome = engine
    .copy(
      &alice(),
      p.source,
      CopyOptions {
        include_dependent_flows: true,
      },
    )
    .unwrap();
  assert_eq!(outcome.copied.len(), 5);
  let (_, sink_copy) = outcome.copied[3];
  let (_, source_copy) = outcome.copied[4];
  let Some(Resource::Sink(sink)) = engine.topology().resource(sink_copy) else {
    panic!("sink copy missing");
  };
  assert_eq!(sink.config.get("data_source_id"), Some(&json!(source_copy.id)));
  assert_eq!(
    engine.topology().source(source_copy.id).and_then(|s| s.data_sink_id),
    Some(sink_copy.id)
  );
}

#[test]
fn test_chown_preflight_blocks_transfer() {
  let mut engine = engine();
  let src = engine
    .create_source(
      &alice(),
      NewSource {
        name: "secure".to_string(),
        connector_type: "s3".to_string(),
        data_sink_id: None,
        credential_id: Some(40),
        project_id: None,
        config: Default::default(),
      },
    )
    .unwrap();
  let r = ResourceRef::source(src.id);
  set_under(&mut engine, &alice(), r, "rows");

  let err = engine.chown(&alice(), r, UserId(2), OrgId(1)).unwrap_err();
  match err {
    GraphError::MissingAccess { missing } => {
      assert_eq!(missing, vec![AccessTarget::Credential(40)]);
    }
    other => panic!("expected missing access, got {other:?}"),
  }
  assert_eq!(engine.topology().resource(r).map(Resource::owner_id), Some(UserId(1)));
}

#[test]
fn test_chown_transfers_whole_flow() {
  let mut access = StaticAccess::new();
  access.grant(AccessTarget::Credential(40), UserId(2), Role::Collaborator);
  let mut engine = engine_with(access);
  let src = engine
    .create_source(
      &alice(),
      NewSource {
        name: "secure".to_string(),
        connector_type: "s3".to_string(),
        data_sink_id: None,
        credential_id: Some(40),
        project_id: None,
        config: Default::default(),
      },
    )
    .unwrap();
  let r = ResourceRef::source(src.id);
  let set = set_under(&mut engine, &alice(), r, "rows");

  let changed = engine.chown(&alice(), r, UserId(2), OrgId(1)).unwrap();
  assert_eq!(changed, vec![r, ResourceRef::set(set.id)]);
  for n in engine.topology().nodes() {
    assert_eq!(n.owner_id, UserId(2));
  }
  assert!(
    engine
      .topology()
      .node_for(ResourceRef::set(set.id))
      .is_some_and(|n| n.shared_origin_node_id.is_none())
  );
}
