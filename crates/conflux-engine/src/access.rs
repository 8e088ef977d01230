//! Access evaluation.
//!
//! Explicit grants come from an [`AccessProvider`]. Ownership and admin level
//! are known to the engine and layered on top by [`AccessEvaluator`], which is
//! also where the traversal boundary rule lives. Results are computed per
//! viewer and per edge; nothing is cached.

use std::collections::{BTreeSet, HashMap};

use conflux_graph::{AccessTarget, GraphNode, OrgId, Topology, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Owner,
  Admin,
  Operator,
  Collaborator,
  Sharer,
}

impl Role {
  /// Whether holding `self` satisfies a check for `required`.
  ///
  /// owner ⊇ admin ⊇ operator ⊇ collaborator. Sharer is only satisfied by
  /// itself.
  pub fn implies(&self, required: Role) -> bool {
    if required == Role::Sharer {
      return *self == Role::Sharer;
    }
    let rank = |role: Role| match role {
      Role::Owner => 4,
      Role::Admin => 3,
      Role::Operator => 2,
      Role::Collaborator => 1,
      Role::Sharer => 0,
    };
    rank(*self) >= rank(required)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
  #[default]
  None,
  OrgAdmin,
  SuperUser,
}

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
  pub user_id: UserId,
  pub org_id: OrgId,
  #[serde(default)]
  pub admin_level: AdminLevel,
}

impl Viewer {
  pub fn member(user_id: UserId, org_id: OrgId) -> Self {
    Self {
      user_id,
      org_id,
      admin_level: AdminLevel::None,
    }
  }

  pub fn org_admin(user_id: UserId, org_id: OrgId) -> Self {
    Self {
      user_id,
      org_id,
      admin_level: AdminLevel::OrgAdmin,
    }
  }

  pub fn super_user(user_id: UserId, org_id: OrgId) -> Self {
    Self {
      user_id,
      org_id,
      admin_level: AdminLevel::SuperUser,
    }
  }

  pub fn is_super_user(&self) -> bool {
    self.admin_level == AdminLevel::SuperUser
  }

  pub fn is_org_admin_of(&self, org_id: OrgId) -> bool {
    self.admin_level == AdminLevel::OrgAdmin && self.org_id == org_id
  }
}

/// Source of explicit role grants.
pub trait AccessProvider: Send + Sync {
  /// Whether `viewer` holds `role` (or a role implying it) on `target`.
  fn has_role(&self, target: AccessTarget, viewer: &Viewer, role: Role) -> bool;
}

/// One explicit grant, as loaded from a grants file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
  pub target: AccessTarget,
  pub user_id: UserId,
  pub role: Role,
}

/// In-memory grant table.
#[derive(Debug, Default)]
pub struct StaticAccess {
  grants: HashMap<(AccessTarget, UserId), BTreeSet<Role>>,
}

impl StaticAccess {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_grants(grants: impl IntoIterator<Item = Grant>) -> Self {
    let mut access = Self::new();
    for grant in grants {
      access.grant(grant.target, grant.user_id, grant.role);
    }
    access
  }

  pub fn grant(&mut self, target: AccessTarget, user_id: UserId, role: Role) {
    self.grants.entry((target, user_id)).or_default().insert(role);
  }
}

impl AccessProvider for StaticAccess {
  fn has_role(&self, target: AccessTarget, viewer: &Viewer, role: Role) -> bool {
    self
      .grants
      .get(&(target, viewer.user_id))
      .is_some_and(|roles| roles.iter().any(|held| held.implies(role)))
  }
}

/// Roles checked for explicit and inherited grants, strongest first.
const GRANTABLE_ROLES: [Role; 4] = [Role::Admin, Role::Operator, Role::Collaborator, Role::Sharer];

/// Combines ownership, admin level, and explicit grants over one topology.
pub struct AccessEvaluator<'a> {
  topology: &'a Topology,
  provider: &'a dyn AccessProvider,
}

impl<'a> AccessEvaluator<'a> {
  pub fn new(topology: &'a Topology, provider: &'a dyn AccessProvider) -> Self {
    Self { topology, provider }
  }

  fn explicit(&self, node: &GraphNode, viewer: &Viewer, role: Role) -> bool {
    self
      .provider
      .has_role(AccessTarget::Resource(node.resource), viewer, role)
  }

  /// Whether the effective role from [`access_role`](Self::access_role)
  /// satisfies `role`. Reported and enforced access are the same thing.
  pub fn has_role(&self, node: &GraphNode, viewer: &Viewer, role: Role) -> bool {
    self
      .access_role(node, viewer)
      .is_some_and(|held| held.implies(role))
  }

  /// Holds the sharer role and nothing that would grant ordinary access.
  pub fn is_sharer_only(&self, node: &GraphNode, viewer: &Viewer) -> bool {
    node.owner_id != viewer.user_id
      && self.explicit(node, viewer, Role::Sharer)
      && !self.explicit(node, viewer, Role::Collaborator)
  }

  /// Whether `viewer` may traverse from `from` into its child `to`.
  pub fn can_traverse(&self, viewer: &Viewer, from: &GraphNode, to: &GraphNode) -> bool {
    if to.origin_node_id == from.origin_node_id {
      return true;
    }
    if to.shared_origin_node_id != Some(from.origin_node_id) {
      return false;
    }
    if viewer.is_super_user() || self.is_sharer_only(from, viewer) {
      return true;
    }
    // Crossing into another org needs elevated privilege, handled above.
    if to.org_id != from.org_id {
      return false;
    }
    to.owner_id == viewer.user_id || viewer.is_org_admin_of(to.org_id)
  }

  /// Effective role: owner, then org admin, then the strongest
  /// explicit grant, then the strongest grant inherited from the boundary
  /// (shared origin, or else the flow origin).
  pub fn access_role(&self, node: &GraphNode, viewer: &Viewer) -> Option<Role> {
    if node.owner_id == viewer.user_id {
      return Some(Role::Owner);
    }
    if viewer.is_super_user() || viewer.is_org_admin_of(node.org_id) {
      return Some(Role::Admin);
    }
    if let Some(role) = GRANTABLE_ROLES
      .into_iter()
      .find(|role| self.explicit(node, viewer, *role))
    {
      return Some(role);
    }

    let boundary_id = node.shared_origin_node_id.unwrap_or(node.origin_node_id);
    if boundary_id == node.id {
      return None;
    }
    let boundary = self.topology.node(boundary_id)?;
    GRANTABLE_ROLES
      .into_iter()
      .find(|role| self.explicit(boundary, viewer, *role))
  }

  pub fn can_read(&self, node: &GraphNode, viewer: &Viewer) -> bool {
    self.access_role(node, viewer).is_some()
  }

  pub fn can_write(&self, node: &GraphNode, viewer: &Viewer) -> bool {
    self.has_role(node, viewer, Role::Collaborator)
  }

  pub fn can_operate(&self, node: &GraphNode, viewer: &Viewer) -> bool {
    self.has_role(node, viewer, Role::Operator)
  }

  pub fn can_manage(&self, node: &GraphNode, viewer: &Viewer) -> bool {
    self.has_role(node, viewer, Role::Admin)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use conflux_graph::{NodeId, ResourceRef, ResourceStatus};

  fn node(id: u64, org: u64, owner: u64, origin: u64, shared: Option<u64>) -> GraphNode {
    GraphNode {
      id: NodeId(id),
      owner_id: UserId(owner),
      org_id: OrgId(org),
      resource: ResourceRef::set(id),
      parent_node_id: None,
      origin_node_id: NodeId(origin),
      shared_origin_node_id: shared.map(NodeId),
      status: ResourceStatus::Init,
      project_id: None,
    }
  }

  #[test]
  fn test_role_hierarchy() {
    assert!(Role::Admin.implies(Role::Collaborator));
    assert!(!Role::Collaborator.implies(Role::Operator));
    assert!(!Role::Admin.implies(Role::Sharer));
    assert!(Role::Sharer.implies(Role::Sharer));
    assert!(!Role::Sharer.implies(Role::Collaborator));
  }

  #[test]
  fn test_same_origin_always_traversable() {
    let topology = Topology::new();
    let access = StaticAccess::new();
    let evaluator = AccessEvaluator::new(&topology, &access);
    let viewer = Viewer::member(UserId(99), OrgId(99));
    assert!(evaluator.can_traverse(&viewer, &node(1, 1, 1, 1, None), &node(2, 1, 1, 1, None)));
  }

  #[test]
  fn test_sharer_crosses_org_boundary_but_collaborator_does_not() {
    let topology = Topology::new();
    let x = node(1, 1, 10, 1, None);
    let y = node(2, 2, 20, 2, Some(1));

    let mut access = StaticAccess::new();
    access.grant(AccessTarget::Resource(x.resource), UserId(30), Role::Sharer);
    access.grant(AccessTarget::Resource(x.resource), UserId(40), Role::Collaborator);
    let evaluator = AccessEvaluator::new(&topology, &access);

    let sharer = Viewer::member(UserId(30), OrgId(2));
    assert!(evaluator.can_traverse(&sharer, &x, &y));

    let collaborator = Viewer::member(UserId(40), OrgId(1));
    assert!(!evaluator.can_traverse(&collaborator, &x, &y));

    let root = Viewer::super_user(UserId(50), OrgId(3));
    assert!(evaluator.can_traverse(&root, &x, &y));
  }

  #[test]
  fn test_same_org_boundary_requires_ownership_or_admin() {
    let topology = Topology::new();
    let access = StaticAccess::new();
    let evaluator = AccessEvaluator::new(&topology, &access);
    let x = node(1, 1, 10, 1, None);
    let y = node(2, 1, 20, 2, Some(1));

    assert!(evaluator.can_traverse(&Viewer::member(UserId(20), OrgId(1)), &x, &y));
    assert!(evaluator.can_traverse(&Viewer::org_admin(UserId(5), OrgId(1)), &x, &y));
    assert!(!evaluator.can_traverse(&Viewer::member(UserId(10), OrgId(1)), &x, &y));
  }

  #[test]
  fn test_unrelated_origin_is_never_traversable() {
    let topology = Topology::new();
    let access = StaticAccess::new();
    let evaluator = AccessEvaluator::new(&topology, &access);
    let viewer = Viewer::super_user(UserId(1), OrgId(1));
    assert!(!evaluator.can_traverse(&viewer, &node(1, 1, 1, 1, None), &node(2, 1, 1, 2, None)));
  }

  #[test]
  fn test_access_role_precedence() {
    let mut topology = Topology::new();
    let origin = node(1, 1, 10, 1, None);
    let child = node(2, 1, 10, 1, None);
    topology.insert_node(origin.clone()).unwrap();
    topology.insert_node(child.clone()).unwrap();

    let mut access = StaticAccess::new();
    access.grant(AccessTarget::Resource(origin.resource), UserId(7), Role::Operator);
    access.grant(AccessTarget::Resource(child.resource), UserId(8), Role::Sharer);
    let evaluator = AccessEvaluator::new(&topology, &access);

    assert_eq!(
      evaluator.access_role(&child, &Viewer::member(UserId(10), OrgId(1))),
      Some(Role::Owner)
    );
    assert_eq!(
      evaluator.access_role(&child, &Viewer::org_admin(UserId(3), OrgId(1))),
      Some(Role::Admin)
    );
    assert_eq!(
      evaluator.access_role(&child, &Viewer::member(UserId(8), OrgId(2))),
      Some(Role::Sharer)
    );
    // Inherited from the flow origin.
    assert_eq!(
      evaluator.access_role(&child, &Viewer::member(UserId(7), OrgId(2))),
      Some(Role::Operator)
    );
    assert_eq!(
      evaluator.access_role(&child, &Viewer::member(UserId(9), OrgId(2))),
      None
    );
  }

  #[test]
  fn test_inherited_grant_is_enforced() {
    let mut topology = Topology::new();
    let origin = node(1, 1, 10, 1, None);
    let child = node(2, 1, 10, 1, None);
    topology.insert_node(origin.clone()).unwrap();
    topology.insert_node(child.clone()).unwrap();

    let mut access = StaticAccess::new();
    access.grant(AccessTarget::Resource(origin.resource), UserId(7), Role::Collaborator);
    access.grant(AccessTarget::Resource(child.resource), UserId(8), Role::Sharer);
    access.grant(AccessTarget::Resource(origin.resource), UserId(8), Role::Admin);
    let evaluator = AccessEvaluator::new(&topology, &access);

    let collaborator = Viewer::member(UserId(7), OrgId(1));
    assert_eq!(evaluator.access_role(&child, &collaborator), Some(Role::Collaborator));
    assert!(evaluator.can_write(&child, &collaborator));
    assert!(!evaluator.can_operate(&child, &collaborator));

    // An explicit grant on the node wins over the inherited one.
    let sharer = Viewer::member(UserId(8), OrgId(1));
    assert_eq!(evaluator.access_role(&child, &sharer), Some(Role::Sharer));
    assert!(!evaluator.can_write(&child, &sharer));

    assert!(evaluator.can_manage(&child, &Viewer::super_user(UserId(1), OrgId(9))));
  }
}
