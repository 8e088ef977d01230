use thiserror::Error;

use crate::ids::{AccessTarget, NodeId, ResourceKind, ResourceRef};

/// Errors returned by graph operations.
///
/// All variants except [`GraphError::Internal`] are user-facing and carry a
/// message the caller can act on. `Internal` wraps a [`Fault`]: a broken
/// internal invariant that indicates a caller bug.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("bad request: {message}")]
  BadRequest { message: String },

  #[error("forbidden: {message}")]
  Forbidden { message: String },

  #[error("conflict: {message}")]
  Conflict {
    message: String,
    blocking_ids: Vec<ResourceRef>,
  },

  #[error("method not allowed: {message}")]
  MethodNotAllowed { message: String },

  #[error("{resource} not found")]
  NotFound { resource: String },

  #[error("trigger would create a cycle through edges {chain:?}")]
  CycleDetected { chain: Vec<u64> },

  #[error("splitter allows at most {limit} rules, got {requested}")]
  RuleLimitExceeded { limit: usize, requested: usize },

  #[error("new owner lacks access to {} referenced resource(s)", missing.len())]
  MissingAccess { missing: Vec<AccessTarget> },

  #[error("internal error")]
  Internal(#[from] Fault),
}

/// Internal-consistency faults. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
  #[error("graph node missing for {0}")]
  MissingGraphNode(ResourceRef),

  #[error("expected a {expected} resource, got {actual}")]
  WrongResourceKind {
    expected: ResourceKind,
    actual: ResourceRef,
  },

  #[error("node {from} points at missing node {to}")]
  DanglingPointer { from: NodeId, to: NodeId },

  #[error("parent chain from node {0} does not terminate")]
  ParentCycle(NodeId),
}

impl GraphError {
  pub fn bad_request(message: impl Into<String>) -> Self {
    GraphError::BadRequest {
      message: message.into(),
    }
  }

  pub fn forbidden(message: impl Into<String>) -> Self {
    GraphError::Forbidden {
      message: message.into(),
    }
  }

  pub fn conflict(message: impl Into<String>, blocking_ids: Vec<ResourceRef>) -> Self {
    GraphError::Conflict {
      message: message.into(),
      blocking_ids,
    }
  }

  pub fn method_not_allowed(message: impl Into<String>) -> Self {
    GraphError::MethodNotAllowed {
      message: message.into(),
    }
  }

  pub fn not_found(resource: impl ToString) -> Self {
    GraphError::NotFound {
      resource: resource.to_string(),
    }
  }

  /// Whether this error is an internal fault rather than a user error.
  pub fn is_fault(&self) -> bool {
    matches!(self, GraphError::Internal(_))
  }

  /// Resources blocking the operation, if the error reports any.
  pub fn blocking_ids(&self) -> &[ResourceRef] {
    match self {
      GraphError::Conflict { blocking_ids, .. } => blocking_ids,
      _ => &[],
    }
  }
}
