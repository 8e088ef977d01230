//! Conflux Engine
//!
//! Runs structural operations over a [`conflux_graph::Topology`]: creating
//! resources and their graph nodes, reparenting, cascading lifecycle changes,
//! splitter branch management, trigger edges and flow links, and assembling
//! flows for a viewer.
//!
//! Every mutation goes through [`TopologyEngine`] and runs as one transaction.
//! Either the whole cascade lands or nothing does. Control-plane events are
//! published only after commit.

mod access;
mod assembler;
mod builder;
mod engine;
mod events;
mod lifecycle;
mod links;
mod providers;
mod splitter;
mod triggers;

pub use access::{AccessEvaluator, AccessProvider, AdminLevel, Grant, Role, StaticAccess, Viewer};
pub use assembler::{FlowAssembler, FlowEntry, FlowResult, FlowTree, merge_results, merge_trees};
pub use builder::{NewSet, NewSink, NewSource};
pub use engine::TopologyEngine;
pub use events::{
  ChannelPublisher, ControlPlaneEvent, ControlPlanePublisher, EventType, NoopPublisher,
  PublishError,
};
pub use lifecycle::{CopyOptions, CopyOutcome};
pub use links::NewFlowLink;
pub use providers::{Doc, DocProvider, InMemoryDocs, InMemoryTags, TagProvider};
pub use triggers::NewTrigger;
