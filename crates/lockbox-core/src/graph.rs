// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory permission graph.
//!
//! Holds the resources, registered identities and explicit grants of one vault.
//! Access decisions are pure lookups:
//!
//! 1. **Ownership**: the owner of a resource holds every privilege on it
//! 2. **Explicit grants**: otherwise the (identity, resource) index must contain
//!    the requested privilege
//!
//! No grant implies another. `write` does not imply `read`, and nothing is
//! inherited along the resource hierarchy or through groups.
//!
//! The graph itself is not synchronized. The engine keeps it behind a
//! single-writer, multi-reader lock so `authorized` never observes a
//! half-applied policy.

use std::collections::HashMap;

use tracing::instrument;

use crate::types::{
	Grant, IdentityId, IdentityKind, Privilege, PrivilegeSet, Resource, ResourceId, ResourceKind,
};

#[derive(Debug, Default, Clone)]
pub struct PermissionGraph {
	resources: HashMap<ResourceId, Resource>,
	identities: HashMap<IdentityId, IdentityKind>,
	/// identity -> resource -> privileges
	grants: HashMap<IdentityId, HashMap<ResourceId, PrivilegeSet>>,
	/// Successful loads per policy branch.
	policy_versions: HashMap<ResourceId, u32>,
}

impl PermissionGraph {
	pub fn new() -> Self {
		Self::default()
	}

	// =========================================================================
	// Grants
	// =========================================================================

	/// Add a grant. Returns false if it was already present.
	pub fn grant(&mut self, identity: &IdentityId, resource: &ResourceId, privilege: Privilege) -> bool {
		self.grants
			.entry(identity.clone())
			.or_default()
			.entry(resource.clone())
			.or_default()
			.insert(privilege)
	}

	/// Remove a grant. Returns false if there was nothing to remove.
	pub fn revoke(&mut self, identity: &IdentityId, resource: &ResourceId, privilege: Privilege) -> bool {
		let Some(by_resource) = self.grants.get_mut(identity) else {
			return false;
		};
		let Some(set) = by_resource.get_mut(resource) else {
			return false;
		};

		let removed = set.remove(privilege);
		if set.is_empty() {
			by_resource.remove(resource);
		}
		if by_resource.is_empty() {
			self.grants.remove(identity);
		}
		removed
	}

	/// True if the identity holds `privilege` on the resource through an
	/// explicit grant, ignoring ownership.
	pub fn has_grant(&self, identity: &IdentityId, resource: &ResourceId, privilege: Privilege) -> bool {
		self.explicit(identity, resource).contains(privilege)
	}

	/// Access decision for one (identity, resource, privilege) triple.
	#[instrument(level = "trace", skip_all, fields(identity = %identity, resource = %resource, privilege = %privilege))]
	pub fn authorized(&self, identity: &IdentityId, resource: &ResourceId, privilege: Privilege) -> bool {
		self.privileges(identity, resource).contains(privilege)
	}

	/// Effective privileges of an identity on a resource.
	pub fn privileges(&self, identity: &IdentityId, resource: &ResourceId) -> PrivilegeSet {
		if self.is_owner(identity, resource) {
			return PrivilegeSet::all();
		}
		self.explicit(identity, resource)
	}

	fn explicit(&self, identity: &IdentityId, resource: &ResourceId) -> PrivilegeSet {
		self.grants
			.get(identity)
			.and_then(|by_resource| by_resource.get(resource))
			.copied()
			.unwrap_or_default()
	}

	fn is_owner(&self, identity: &IdentityId, resource: &ResourceId) -> bool {
		self.resources
			.get(resource)
			.is_some_and(|r| &r.owner == identity)
	}

	/// Every explicit grant, in no particular order.
	pub fn grants(&self) -> impl Iterator<Item = Grant> + '_ {
		self.grants.iter().flat_map(|(identity, by_resource)| {
			by_resource.iter().flat_map(move |(resource, set)| {
				set.iter().map(move |privilege| Grant {
					identity: identity.clone(),
					resource: resource.clone(),
					privilege,
				})
			})
		})
	}

	// =========================================================================
	// Resources
	// =========================================================================

	pub fn resource_exists(&self, id: &ResourceId) -> bool {
		self.resources.contains_key(id)
	}

	pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
		self.resources.get(id)
	}

	pub fn resources(&self) -> impl Iterator<Item = &Resource> + '_ {
		self.resources.values()
	}

	/// Insert a resource. Returns false and leaves the graph untouched if the
	/// id is taken.
	pub fn add_resource(&mut self, resource: Resource) -> bool {
		if self.resources.contains_key(&resource.id) {
			return false;
		}
		self.resources.insert(resource.id.clone(), resource);
		true
	}

	/// Remove a resource together with any grant that still names it.
	///
	/// Resources are never deleted by callers; this exists to unwind a policy
	/// application that has not been committed.
	pub fn remove_resource(&mut self, id: &ResourceId) -> Option<Resource> {
		let removed = self.resources.remove(id)?;
		self.grants.retain(|_, by_resource| {
			by_resource.remove(id);
			!by_resource.is_empty()
		});
		self.policy_versions.remove(id);
		Some(removed)
	}

	/// Resources the identity owns or holds at least one privilege on.
	pub fn visible_to<'a>(&'a self, identity: &'a IdentityId) -> impl Iterator<Item = &'a Resource> + 'a {
		self.resources
			.values()
			.filter(move |r| !self.privileges(identity, &r.id).is_empty())
	}

	// =========================================================================
	// Identities
	// =========================================================================

	/// Register an identity. Returns false if it already exists.
	pub fn add_identity(&mut self, id: IdentityId, kind: IdentityKind) -> bool {
		if self.identities.contains_key(&id) {
			return false;
		}
		self.identities.insert(id, kind);
		true
	}

	pub fn identity_exists(&self, id: &IdentityId) -> bool {
		self.identities.contains_key(id)
	}

	pub fn identity_kind(&self, id: &IdentityId) -> Option<IdentityKind> {
		self.identities.get(id).copied()
	}

	pub fn identities(&self) -> impl Iterator<Item = (&IdentityId, IdentityKind)> + '_ {
		self.identities.iter().map(|(id, kind)| (id, *kind))
	}

	/// True if the id can appear as a grantee: a registered identity or a group.
	pub fn role_exists(&self, id: &IdentityId) -> bool {
		if self.identities.contains_key(id) {
			return true;
		}
		ResourceId::new(id.as_str())
			.ok()
			.and_then(|rid| self.resources.get(&rid))
			.is_some_and(|r| r.kind == ResourceKind::Group)
	}

	// =========================================================================
	// Policy versions
	// =========================================================================

	/// Number of successful loads of a policy branch (0 if never loaded).
	pub fn policy_version(&self, branch: &ResourceId) -> u32 {
		self.policy_versions.get(branch).copied().unwrap_or(0)
	}

	/// Record a successful load and return the new version.
	pub fn bump_policy_version(&mut self, branch: &ResourceId) -> u32 {
		let version = self.policy_versions.entry(branch.clone()).or_insert(0);
		*version += 1;
		*version
	}

	pub(crate) fn set_policy_version(&mut self, branch: ResourceId, version: u32) {
		self.policy_versions.insert(branch, version);
	}

	pub fn policy_versions(&self) -> impl Iterator<Item = (&ResourceId, u32)> + '_ {
		self.policy_versions.iter().map(|(id, v)| (id, *v))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn rid(s: &str) -> ResourceId {
		ResourceId::new(s).unwrap()
	}

	fn iid(s: &str) -> IdentityId {
		IdentityId::new(s).unwrap()
	}

	fn graph_with_variable() -> PermissionGraph {
		let mut graph = PermissionGraph::new();
		graph.add_identity(iid("admin"), IdentityKind::User);
		graph.add_identity(iid("bob"), IdentityKind::User);
		graph.add_resource(Resource::new(ResourceId::root(), ResourceKind::Policy, iid("admin")));
		graph.add_resource(Resource::new(rid("a/b/c"), ResourceKind::Variable, iid("admin")));
		graph
	}

	mod grants {
		use super::*;

		#[test]
		fn grant_then_authorized() {
			let mut graph = graph_with_variable();
			assert!(!graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Read));
			assert!(graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Read));
			assert!(graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Read));
		}

		#[test]
		fn grant_is_idempotent() {
			let mut graph = graph_with_variable();
			assert!(graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Read));
			assert!(!graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Read));
			assert_eq!(graph.grants().count(), 1);
			assert!(graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Read));
		}

		#[test]
		fn revoke_missing_grant_is_noop() {
			let mut graph = graph_with_variable();
			assert!(!graph.revoke(&iid("bob"), &rid("a/b/c"), Privilege::Write));
			assert_eq!(graph.grants().count(), 0);
		}

		#[test]
		fn revoke_removes_only_that_privilege() {
			let mut graph = graph_with_variable();
			graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Read);
			graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Write);
			assert!(graph.revoke(&iid("bob"), &rid("a/b/c"), Privilege::Write));
			assert!(graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Read));
			assert!(!graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Write));
		}

		#[test]
		fn no_privilege_implies_another() {
			let mut graph = graph_with_variable();
			graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Write);
			assert!(!graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Read));
			graph.grant(&iid("bob"), &ResourceId::root(), Privilege::Update);
			assert!(!graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Update));
		}

		#[test]
		fn no_inheritance_along_hierarchy() {
			let mut graph = graph_with_variable();
			graph.add_resource(Resource::new(rid("a/b"), ResourceKind::Policy, iid("admin")));
			graph.grant(&iid("bob"), &rid("a/b"), Privilege::Read);
			assert!(!graph.authorized(&iid("bob"), &rid("a/b/c"), Privilege::Read));
		}

		proptest! {
			#[test]
			fn repeated_grants_equal_single_grant(times in 1usize..6, pick in 0usize..4) {
				let privilege = Privilege::ALL[pick];
				let mut once = graph_with_variable();
				once.grant(&iid("bob"), &rid("a/b/c"), privilege);
				let mut many = graph_with_variable();
				for _ in 0..times {
					many.grant(&iid("bob"), &rid("a/b/c"), privilege);
				}
				for p in Privilege::ALL {
					prop_assert_eq!(
						once.authorized(&iid("bob"), &rid("a/b/c"), p),
						many.authorized(&iid("bob"), &rid("a/b/c"), p)
					);
				}
			}
		}
	}

	mod ownership {
		use super::*;

		#[test]
		fn owner_holds_every_privilege() {
			let graph = graph_with_variable();
			for privilege in Privilege::ALL {
				assert!(graph.authorized(&iid("admin"), &rid("a/b/c"), privilege));
			}
			assert_eq!(graph.grants().count(), 0);
		}

		#[test]
		fn unknown_resource_is_never_authorized() {
			let graph = graph_with_variable();
			assert!(!graph.authorized(&iid("admin"), &rid("nope"), Privilege::Read));
		}
	}

	mod resources {
		use super::*;

		#[test]
		fn add_resource_rejects_duplicates() {
			let mut graph = graph_with_variable();
			let dup = Resource::new(rid("a/b/c"), ResourceKind::Group, iid("bob"));
			assert!(!graph.add_resource(dup));
			assert_eq!(graph.resource(&rid("a/b/c")).unwrap().owner, iid("admin"));
		}

		#[test]
		fn remove_resource_drops_its_grants() {
			let mut graph = graph_with_variable();
			graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Read);
			assert!(graph.remove_resource(&rid("a/b/c")).is_some());
			assert!(!graph.resource_exists(&rid("a/b/c")));
			assert_eq!(graph.grants().count(), 0);
		}

		#[test]
		fn visible_to_lists_owned_and_granted() {
			let mut graph = graph_with_variable();
			assert_eq!(graph.visible_to(&iid("bob")).count(), 0);
			graph.grant(&iid("bob"), &rid("a/b/c"), Privilege::Execute);
			let visible: Vec<_> = graph.visible_to(&iid("bob")).map(|r| r.id.clone()).collect();
			assert_eq!(visible, vec![rid("a/b/c")]);
			assert_eq!(graph.visible_to(&iid("admin")).count(), 2);
		}
	}

	mod roles {
		use super::*;

		#[test]
		fn groups_and_identities_are_roles() {
			let mut graph = graph_with_variable();
			graph.add_resource(Resource::new(rid("ops"), ResourceKind::Group, iid("admin")));
			assert!(graph.role_exists(&iid("bob")));
			assert!(graph.role_exists(&iid("ops")));
			assert!(!graph.role_exists(&iid("a/b/c")));
			assert!(!graph.role_exists(&iid("carol")));
		}

		#[test]
		fn add_identity_rejects_duplicates() {
			let mut graph = graph_with_variable();
			assert!(!graph.add_identity(iid("bob"), IdentityKind::Host));
			assert_eq!(graph.identity_kind(&iid("bob")), Some(IdentityKind::User));
		}
	}

	#[test]
	fn policy_versions_count_from_one() {
		let mut graph = graph_with_variable();
		let root = ResourceId::root();
		assert_eq!(graph.policy_version(&root), 0);
		assert_eq!(graph.bump_policy_version(&root), 1);
		assert_eq!(graph.bump_policy_version(&root), 2);
		assert_eq!(graph.policy_version(&root), 2);
	}
}
