//! Trigger edges and flow links.

mod common;

use common::*;
use conflux_engine::{NewFlowLink, NewTrigger, Role, StaticAccess, TopologyEngine};
use conflux_graph::{
  AccessTarget, GraphError, LinkType, ResourceRef, TriggeredEvent, TriggeringEvent,
};

fn trigger(from: ResourceRef, to: ResourceRef) -> NewTrigger {
  NewTrigger {
    triggering: from,
    triggered: to,
    triggering_event: TriggeringEvent::DataSinkWriteDone,
    triggered_event: TriggeredEvent::DataSourceRead,
  }
}

fn two_flows(engine: &mut TopologyEngine) -> (Pipeline, ResourceRef) {
  let p = pipeline(engine, &alice());
  let other = source(engine, &alice(), "downstream");
  (p, ResourceRef::source(other.id))
}

#[test]
fn test_two_cycle_is_rejected() {
  let mut engine = engine();
  let (p, other) = two_flows(&mut engine);

  let edge = engine.create_trigger(&alice(), trigger(p.sink, other)).unwrap();
  let err = engine.create_trigger(&alice(), trigger(other, p.sink)).unwrap_err();
  match err {
    GraphError::CycleDetected { chain } => {
      assert_eq!(chain.len(), 2);
      assert_eq!(chain[1], edge.id);
    }
    other => panic!("expected cycle, got {other:?}"),
  }
  assert_eq!(engine.topology().triggers().count(), 1);
}

#[test]
fn test_same_flow_trigger_is_rejected() {
  let mut engine = engine();
  let p = pipeline(&mut engine, &alice());
  let err = engine.create_trigger(&alice(), trigger(p.sink, p.source)).unwrap_err();
  assert!(matches!(err, GraphError::BadRequest { .. }));
  assert_eq!(engine.topology().triggers().count(), 0);
}

#[test]
fn test_chain_then_closing_edge() {
  let mut engine = engine();
  let a = ResourceRef::source(source(&mut engine, &alice(), "a").id);
  let b = ResourceRef::source(source(&mut engine, &alice(), "b").id);
  let c = ResourceRef::source(source(&mut engine, &alice(), "c").id);

  let ab = engine.create_trigger(&alice(), trigger(a, b)).unwrap();
  let bc = engine.create_trigger(&alice(), trigger(b, c)).unwrap();
  // A non-cycle edge is visible to later searches.
  let err = engine.create_trigger(&alice(), trigger(c, a)).unwrap_err();
  match err {
    GraphError::CycleDetected { chain } => assert_eq!(&chain[1..], &[ab.id, bc.id]),
    other => panic!("expected cycle, got {other:?}"),
  }

  let err = engine.create_trigger(&alice(), trigger(a, b)).unwrap_err();
  assert!(matches!(err, GraphError::Conflict { .. }));
}

#[test]
fn test_update_trigger_checks_cycles() {
  let mut engine = engine();
  let a = ResourceRef::source(source(&mut engine, &alice(), "a").id);
  let b = ResourceRef::source(source(&mut engine, &alice(), "b").id);
  let c = ResourceRef::source(source(&mut engine, &alice(), "c").id);

  engine.create_trigger(&alice(), trigger(a, b)).unwrap();
  let bc = engine.create_trigger(&alice(), trigger(b, c)).unwrap();

  let err = engine.update_trigger(&alice(), bc.id, trigger(b, a)).unwrap_err();
  assert!(matches!(err, GraphError::CycleDetected { .. }));
  let stored = engine.topology().trigger(bc.id).unwrap();
  assert_eq!(stored, &bc);

  let updated = engine.update_trigger(&alice(), bc.id, trigger(c, b)).unwrap();
  assert_eq!(updated.id, bc.id);
  engine.delete_trigger(&alice(), bc.id).unwrap();
  assert!(engine.topology().trigger(bc.id).is_none());
}

#[test]
fn test_trigger_requires_operator_on_both_flows() {
  let mut access = StaticAccess::new();
  let mut engine = engine();
  let (p, other) = two_flows(&mut engine);
  access.grant(AccessTarget::Resource(p.sink), bob().user_id, Role::Operator);
  let mut engine = engine_with(access).with_topology(engine.into_topology());

  let err = engine.create_trigger(&bob(), trigger(p.sink, other)).unwrap_err();
  assert!(matches!(err, GraphError::Forbidden { .. }));
}

#[test]
fn test_symmetric_links_are_canonical() {
  let mut engine = engine();
  let (p, other) = two_flows(&mut engine);

  let link = engine
    .create_link(
      &alice(),
      NewFlowLink {
        left: other,
        right: p.first,
        link_type: LinkType::Peer,
        retriever_data_source_id: None,
      },
    )
    .unwrap();
  assert!(link.left_origin_node_id < link.right_origin_node_id);

  let err = engine
    .create_link(
      &alice(),
      NewFlowLink {
        left: p.source,
        right: other,
        link_type: LinkType::Peer,
        retriever_data_source_id: None,
      },
    )
    .unwrap_err();
  assert!(matches!(err, GraphError::Conflict { .. }));

  assert_eq!(engine.links_for(p.sink).unwrap(), vec![link.clone()]);
  engine.delete_link(&alice(), link.id).unwrap();
  assert!(engine.links_for(other).unwrap().is_empty());
}

#[test]
fn test_retrieval_link_needs_existing_source() {
  let mut engine = engine();
  let (p, other) = two_flows(&mut engine);
  let err = engine
    .create_link(
      &alice(),
      NewFlowLink {
        left: p.source,
        right: other,
        link_type: LinkType::Retrieval,
        retriever_data_source_id: Some(404),
      },
    )
    .unwrap_err();
  assert!(matches!(err, GraphError::NotFound { .. }));

  let link = engine
    .create_link(
      &alice(),
      NewFlowLink {
        left: other,
        right: p.source,
        link_type: LinkType::Retrieval,
        retriever_data_source_id: Some(other.id),
      },
    )
    .unwrap();
  // Directed links keep their orientation.
  assert_eq!(
    Some(link.left_origin_node_id),
    engine.topology().node_for(other).map(|n| n.id)
  );
}
