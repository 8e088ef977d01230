//! Control-plane notifications.
//!
//! Structural transitions produce [`ControlPlaneEvent`]s. The engine buffers
//! them for the duration of a transaction and hands them to a
//! [`ControlPlanePublisher`] only after commit. Delivery is fire-and-forget:
//! a failed publish is logged and never affects the committed change.

use conflux_graph::ResourceRef;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
  Created,
  Activated,
  Paused,
  Copied,
  Destroyed,
  Reparented,
  OwnerChanged,
  TransformUpdated,
  TriggerCreated,
  TriggerUpdated,
  TriggerDeleted,
  LinkCreated,
  LinkDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneEvent {
  pub resource: ResourceRef,
  pub event_type: EventType,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
  #[error("control plane channel closed")]
  ChannelClosed,

  #[error("control plane rejected event: {0}")]
  Rejected(String),
}

/// Receives structural transitions for delivery to the control plane.
pub trait ControlPlanePublisher: Send + Sync {
  fn publish(&self, event: &ControlPlaneEvent) -> Result<(), PublishError>;
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopPublisher;

impl ControlPlanePublisher for NoopPublisher {
  fn publish(&self, _event: &ControlPlaneEvent) -> Result<(), PublishError> {
    Ok(())
  }
}

/// Forwards events to an unbounded channel drained by a delivery task.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
  sender: mpsc::UnboundedSender<ControlPlaneEvent>,
}

impl ChannelPublisher {
  pub fn new(sender: mpsc::UnboundedSender<ControlPlaneEvent>) -> Self {
    Self { sender }
  }
}

impl ControlPlanePublisher for ChannelPublisher {
  fn publish(&self, event: &ControlPlaneEvent) -> Result<(), PublishError> {
    self
      .sender
      .send(event.clone())
      .map_err(|_| PublishError::ChannelClosed)
  }
}
