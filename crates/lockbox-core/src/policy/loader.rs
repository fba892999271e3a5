// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy validation and all-or-nothing application.
//!
//! Loading a document is split in two phases that both run under the graph
//! write lock:
//!
//! 1. [`plan`] checks the whole document against the current graph and turns
//!    it into fully-qualified operations. Nothing is mutated.
//! 2. [`Plan::apply`] performs the operations in document order, recording an
//!    undo entry for each mutation. If any step fails, the undo log is
//!    replayed in reverse and the graph and store are left as they were.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::PolicyError;
use crate::graph::PermissionGraph;
use crate::policy::document::{PolicyDocument, Statement};
use crate::store::SecretStore;
use crate::types::{IdentityId, Privilege, Resource, ResourceId, ResourceKind};

/// Outcome of a successful (or previewed) policy load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyResult {
	pub branch: ResourceId,
	/// Successful loads of this branch, counting this one.
	pub version: u32,
	pub resources_created: usize,
	pub grants_added: usize,
	pub grants_revoked: usize,
	/// Ids of the created resources, in document order.
	pub created: Vec<ResourceId>,
}

/// A fully-qualified, validated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
	Create {
		id: ResourceId,
		kind: ResourceKind,
	},
	Grant {
		identity: IdentityId,
		resource: ResourceId,
		privilege: Privilege,
	},
	Revoke {
		identity: IdentityId,
		resource: ResourceId,
		privilege: Privilege,
	},
}

/// A validated document, ready to apply to the graph it was planned against.
#[derive(Debug, Clone)]
pub struct Plan {
	branch: ResourceId,
	/// (statement index, operation)
	operations: Vec<(usize, Operation)>,
}

/// Validate a document for loading into `branch`.
///
/// Ids are relative to the branch: under `root` they are used as written,
/// elsewhere they are prefixed with `<branch>/`. A grantee that names a group
/// declared earlier in the same document resolves to that group; any other
/// grantee is taken as an absolute identity id.
#[instrument(level = "debug", skip_all, fields(branch = %branch, statements = document.len()))]
pub fn plan(
	graph: &PermissionGraph,
	branch: &ResourceId,
	document: &PolicyDocument,
) -> Result<Plan, PolicyError> {
	match graph.resource(branch) {
		Some(resource) if resource.kind == ResourceKind::Policy => {}
		_ => return Err(PolicyError::BranchNotFound(branch.clone())),
	}

	let mut declared: HashMap<ResourceId, ResourceKind> = HashMap::new();
	let mut operations = Vec::with_capacity(document.len());

	for (index, statement) in document.statements().iter().enumerate() {
		let scoped = |raw: &str| {
			ResourceId::scoped(branch, raw).map_err(|e| PolicyError::validation(index, e.to_string()))
		};

		let operation = match statement {
			Statement::CreateVariable { id }
			| Statement::CreateGroup { id }
			| Statement::CreatePolicy { id } => {
				let id = scoped(id.as_str())?;
				let kind = match statement {
					Statement::CreateVariable { .. } => ResourceKind::Variable,
					Statement::CreateGroup { .. } => ResourceKind::Group,
					_ => ResourceKind::Policy,
				};
				if graph.resource_exists(&id) {
					return Err(PolicyError::validation(
						index,
						format!("resource {id} already exists"),
					));
				}
				if kind == ResourceKind::Group && graph.identity_exists(&IdentityId::from(&id)) {
					return Err(PolicyError::validation(
						index,
						format!("group {id} collides with an identity"),
					));
				}
				if declared.insert(id.clone(), kind).is_some() {
					return Err(PolicyError::validation(
						index,
						format!("resource {id} is declared more than once"),
					));
				}
				Operation::Create { id, kind }
			}
			Statement::Grant {
				identity,
				resource,
				privilege,
			}
			| Statement::Revoke {
				identity,
				resource,
				privilege,
			} => {
				let resource = scoped(resource.as_str())?;
				if !graph.resource_exists(&resource) && !declared.contains_key(&resource) {
					return Err(PolicyError::validation(
						index,
						format!("unknown resource {resource}"),
					));
				}
				let identity = resolve_grantee(graph, branch, &declared, identity)
					.map_err(|message| PolicyError::validation(index, message))?;

				if matches!(statement, Statement::Grant { .. }) {
					Operation::Grant {
						identity,
						resource,
						privilege: *privilege,
					}
				} else {
					Operation::Revoke {
						identity,
						resource,
						privilege: *privilege,
					}
				}
			}
		};
		operations.push((index, operation));
	}

	Ok(Plan {
		branch: branch.clone(),
		operations,
	})
}

fn resolve_grantee(
	graph: &PermissionGraph,
	branch: &ResourceId,
	declared: &HashMap<ResourceId, ResourceKind>,
	raw: &str,
) -> Result<IdentityId, String> {
	if let Ok(group) = ResourceId::scoped(branch, raw) {
		if declared.get(&group) == Some(&ResourceKind::Group) {
			return Ok(IdentityId::from(&group));
		}
	}

	let identity = IdentityId::new(raw).map_err(|e| e.to_string())?;
	if graph.role_exists(&identity) {
		Ok(identity)
	} else {
		Err(format!("unknown identity {identity}"))
	}
}

/// One committed mutation, kept until the load succeeds.
enum Undo {
	Resource(ResourceId),
	Slot(ResourceId),
	Grant(IdentityId, ResourceId, Privilege),
	Revoke(IdentityId, ResourceId, Privilege),
}

impl Plan {
	pub fn branch(&self) -> &ResourceId {
		&self.branch
	}

	/// Report what [`Plan::apply`] would do, without mutating anything.
	pub fn preview(&self, graph: &PermissionGraph) -> PolicyResult {
		let mut result = self.empty_result(graph.policy_version(&self.branch) + 1);
		// Grant state as it would be after each step.
		let mut overlay: HashMap<(&IdentityId, &ResourceId, Privilege), bool> = HashMap::new();

		for (_, operation) in &self.operations {
			match operation {
				Operation::Create { id, .. } => {
					result.resources_created += 1;
					result.created.push(id.clone());
				}
				Operation::Grant {
					identity,
					resource,
					privilege,
				} => {
					let key = (identity, resource, *privilege);
					let held = overlay
						.get(&key)
						.copied()
						.unwrap_or_else(|| graph.has_grant(identity, resource, *privilege));
					if !held {
						result.grants_added += 1;
					}
					overlay.insert(key, true);
				}
				Operation::Revoke {
					identity,
					resource,
					privilege,
				} => {
					let key = (identity, resource, *privilege);
					let held = overlay
						.get(&key)
						.copied()
						.unwrap_or_else(|| graph.has_grant(identity, resource, *privilege));
					if held {
						result.grants_revoked += 1;
					}
					overlay.insert(key, false);
				}
			}
		}
		result
	}

	/// Apply the plan. New resources are owned by `owner`; each new variable
	/// gets an empty slot in `store`.
	///
	/// Must be called on the graph the plan was validated against, with no
	/// writer in between.
	#[instrument(level = "debug", skip_all, fields(branch = %self.branch, owner = %owner))]
	pub fn apply<S>(
		self,
		graph: &mut PermissionGraph,
		store: &S,
		owner: &IdentityId,
	) -> Result<PolicyResult, PolicyError>
	where
		S: SecretStore + ?Sized,
	{
		let mut undo: Vec<Undo> = Vec::new();
		let mut result = self.empty_result(0);

		for (index, operation) in self.operations {
			let step = match operation {
				Operation::Create { id, kind } => {
					create(graph, store, owner, &id, kind, &mut undo).map(|()| {
						result.resources_created += 1;
						result.created.push(id);
					})
				}
				Operation::Grant {
					identity,
					resource,
					privilege,
				} => {
					if graph.grant(&identity, &resource, privilege) {
						result.grants_added += 1;
						undo.push(Undo::Grant(identity, resource, privilege));
					}
					Ok(())
				}
				Operation::Revoke {
					identity,
					resource,
					privilege,
				} => {
					if graph.revoke(&identity, &resource, privilege) {
						result.grants_revoked += 1;
						undo.push(Undo::Revoke(identity, resource, privilege));
					}
					Ok(())
				}
			};

			if let Err(message) = step {
				warn!(
					branch = %self.branch,
					statement = index,
					error = %message,
					undo = undo.len(),
					"policy apply failed, rolling back"
				);
				rollback(graph, store, undo);
				return Err(PolicyError::Apply {
					statement: index,
					message,
				});
			}
		}

		result.version = graph.bump_policy_version(&self.branch);
		info!(
			branch = %self.branch,
			version = result.version,
			resources_created = result.resources_created,
			grants_added = result.grants_added,
			grants_revoked = result.grants_revoked,
			"policy applied"
		);
		Ok(result)
	}

	fn empty_result(&self, version: u32) -> PolicyResult {
		PolicyResult {
			branch: self.branch.clone(),
			version,
			resources_created: 0,
			grants_added: 0,
			grants_revoked: 0,
			created: Vec::new(),
		}
	}
}

fn create<S>(
	graph: &mut PermissionGraph,
	store: &S,
	owner: &IdentityId,
	id: &ResourceId,
	kind: ResourceKind,
	undo: &mut Vec<Undo>,
) -> Result<(), String>
where
	S: SecretStore + ?Sized,
{
	if kind == ResourceKind::Variable {
		store.create(id).map_err(|e| e.to_string())?;
		undo.push(Undo::Slot(id.clone()));
	}

	if !graph.add_resource(Resource::new(id.clone(), kind, owner.clone())) {
		return Err(format!("resource {id} appeared during apply"));
	}
	undo.push(Undo::Resource(id.clone()));
	Ok(())
}

fn rollback<S>(graph: &mut PermissionGraph, store: &S, undo: Vec<Undo>)
where
	S: SecretStore + ?Sized,
{
	for entry in undo.into_iter().rev() {
		match entry {
			Undo::Grant(identity, resource, privilege) => {
				graph.revoke(&identity, &resource, privilege);
			}
			Undo::Revoke(identity, resource, privilege) => {
				graph.grant(&identity, &resource, privilege);
			}
			Undo::Resource(id) => {
				graph.remove_resource(&id);
			}
			Undo::Slot(id) => {
				if let Err(e) = store.discard_empty(&id) {
					warn!(resource = %id, error = %e, "failed to discard slot during rollback");
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::StoreError;
	use crate::policy::document::PolicyFormat;
	use crate::store::MemorySecretStore;
	use crate::types::IdentityKind;

	fn rid(s: &str) -> ResourceId {
		ResourceId::new(s).unwrap()
	}

	fn iid(s: &str) -> IdentityId {
		IdentityId::new(s).unwrap()
	}

	fn graph() -> PermissionGraph {
		let mut graph = PermissionGraph::new();
		graph.add_identity(iid("admin"), IdentityKind::User);
		graph.add_identity(iid("bob"), IdentityKind::User);
		graph.add_resource(Resource::new(ResourceId::root(), ResourceKind::Policy, iid("admin")));
		graph
	}

	fn doc(text: &str) -> PolicyDocument {
		PolicyDocument::parse(text, PolicyFormat::Yaml).unwrap()
	}

	fn validation_index(err: PolicyError) -> usize {
		match err {
			PolicyError::Validation { statement, .. } => statement,
			other => panic!("expected validation error, got {other:?}"),
		}
	}

	mod validation {
		use super::*;

		#[test]
		fn forward_reference_fails() {
			let document = doc(
				"
- op: grant
  identity: bob
  resource: a/b/c
  privilege: read
- op: create_variable
  id: a/b/c
",
			);
			let err = plan(&graph(), &ResourceId::root(), &document).unwrap_err();
			assert_eq!(validation_index(err), 0);
		}

		#[test]
		fn duplicate_in_document_fails() {
			let document = doc(
				"
- op: create_variable
  id: x
- op: create_group
  id: x
",
			);
			let err = plan(&graph(), &ResourceId::root(), &document).unwrap_err();
			assert_eq!(validation_index(err), 1);
		}

		#[test]
		fn existing_resource_fails() {
			let document = doc("- op: create_policy\n  id: root\n");
			let err = plan(&graph(), &ResourceId::root(), &document).unwrap_err();
			assert_eq!(validation_index(err), 0);
		}

		#[test]
		fn group_named_like_an_identity_fails() {
			let document = doc(
				"
- op: create_variable
  id: db/pw
- op: create_group
  id: bob
- op: grant
  identity: bob
  resource: db/pw
  privilege: read
",
			);
			let graph = graph();
			let err = plan(&graph, &ResourceId::root(), &document).unwrap_err();
			assert_eq!(validation_index(err), 1);
			assert!(!graph.resource_exists(&rid("db/pw")));
			assert!(!graph.authorized(&iid("bob"), &rid("db/pw"), Privilege::Read));
		}

		#[test]
		fn unknown_identity_fails() {
			let document = doc(
				"
- op: create_variable
  id: x
- op: grant
  identity: carol
  resource: x
  privilege: read
",
			);
			let err = plan(&graph(), &ResourceId::root(), &document).unwrap_err();
			assert_eq!(validation_index(err), 1);
		}

		#[test]
		fn invalid_id_fails() {
			let document = doc("- op: create_variable\n  id: a//b\n");
			let err = plan(&graph(), &ResourceId::root(), &document).unwrap_err();
			assert_eq!(validation_index(err), 0);
		}

		#[test]
		fn branch_must_be_a_policy() {
			let mut graph = graph();
			graph.add_resource(Resource::new(rid("v"), ResourceKind::Variable, iid("admin")));
			assert!(matches!(
				plan(&graph, &rid("v"), &PolicyDocument::default()),
				Err(PolicyError::BranchNotFound(_))
			));
			assert!(matches!(
				plan(&graph, &rid("nope"), &PolicyDocument::default()),
				Err(PolicyError::BranchNotFound(_))
			));
		}
	}

	mod scoping {
		use super::*;

		#[test]
		fn nested_branch_prefixes_ids() {
			let mut graph = graph();
			graph.add_resource(Resource::new(rid("apps"), ResourceKind::Policy, iid("admin")));
			let document = doc(
				"
- op: create_variable
  id: db/password
- op: create_group
  id: readers
- op: grant
  identity: readers
  resource: db/password
  privilege: read
- op: grant
  identity: bob
  resource: db/password
  privilege: write
",
			);
			let store = MemorySecretStore::new();
			let result = plan(&graph, &rid("apps"), &document)
				.unwrap()
				.apply(&mut graph, &store, &iid("admin"))
				.unwrap();

			assert_eq!(result.created, vec![rid("apps/db/password"), rid("apps/readers")]);
			assert!(graph.authorized(&iid("apps/readers"), &rid("apps/db/password"), Privilege::Read));
			assert!(graph.authorized(&iid("bob"), &rid("apps/db/password"), Privilege::Write));
			assert!(store.contains(&rid("apps/db/password")));
		}
	}

	mod apply {
		use super::*;

		#[test]
		fn creates_resources_slots_and_grants() {
			let mut graph = graph();
			let store = MemorySecretStore::new();
			let document = doc(
				"
- op: create_variable
  id: a/b/c
- op: grant
  identity: bob
  resource: a/b/c
  privilege: read
",
			);
			let result = plan(&graph, &ResourceId::root(), &document)
				.unwrap()
				.apply(&mut graph, &store, &iid("admin"))
				.unwrap();

			assert_eq!(result.resources_created, 1);
			assert_eq!(result.grants_added, 1);
			assert_eq!(result.version, 1);
			assert_eq!(graph.resource(&rid("a/b/c")).unwrap().owner, iid("admin"));
			assert!(matches!(
				store.get(&rid("a/b/c"), None),
				Err(StoreError::NotFound(_))
			));
		}

		#[test]
		fn regrant_adds_nothing() {
			let mut graph = graph();
			let store = MemorySecretStore::new();
			graph.add_resource(Resource::new(rid("x"), ResourceKind::Variable, iid("admin")));
			graph.grant(&iid("bob"), &rid("x"), Privilege::Read);

			let document = doc("- op: grant\n  identity: bob\n  resource: x\n  privilege: read\n");
			let result = plan(&graph, &ResourceId::root(), &document)
				.unwrap()
				.apply(&mut graph, &store, &iid("admin"))
				.unwrap();
			assert_eq!(result.grants_added, 0);
		}

		#[test]
		fn revoke_counts_removed_grants() {
			let mut graph = graph();
			let store = MemorySecretStore::new();
			graph.add_resource(Resource::new(rid("x"), ResourceKind::Variable, iid("admin")));
			graph.grant(&iid("bob"), &rid("x"), Privilege::Read);

			let document = doc(
				"
- op: revoke
  identity: bob
  resource: x
  privilege: read
- op: revoke
  identity: bob
  resource: x
  privilege: write
",
			);
			let result = plan(&graph, &ResourceId::root(), &document)
				.unwrap()
				.apply(&mut graph, &store, &iid("admin"))
				.unwrap();
			assert_eq!(result.grants_revoked, 1);
			assert!(!graph.authorized(&iid("bob"), &rid("x"), Privilege::Read));
		}

		#[test]
		fn slot_collision_rolls_back_everything() {
			let mut graph = graph();
			let store = MemorySecretStore::new();
			// A slot with no graph resource behind it makes the second create fail.
			store.create(&rid("orphan")).unwrap();

			let document = doc(
				"
- op: create_variable
  id: first
- op: grant
  identity: bob
  resource: first
  privilege: read
- op: create_variable
  id: orphan
",
			);
			let err = plan(&graph, &ResourceId::root(), &document)
				.unwrap()
				.apply(&mut graph, &store, &iid("admin"))
				.unwrap_err();

			assert!(matches!(err, PolicyError::Apply { statement: 2, .. }));
			assert!(!graph.resource_exists(&rid("first")));
			assert!(!graph.resource_exists(&rid("orphan")));
			assert!(!store.contains(&rid("first")));
			assert!(store.contains(&rid("orphan")));
			assert_eq!(graph.grants().count(), 0);
			assert_eq!(graph.policy_version(&ResourceId::root()), 0);
		}

		#[test]
		fn rollback_restores_revoked_grants() {
			let mut graph = graph();
			let store = MemorySecretStore::new();
			graph.add_resource(Resource::new(rid("x"), ResourceKind::Variable, iid("admin")));
			graph.grant(&iid("bob"), &rid("x"), Privilege::Read);
			store.create(&rid("orphan")).unwrap();

			let document = doc(
				"
- op: revoke
  identity: bob
  resource: x
  privilege: read
- op: create_variable
  id: orphan
",
			);
			plan(&graph, &ResourceId::root(), &document)
				.unwrap()
				.apply(&mut graph, &store, &iid("admin"))
				.unwrap_err();
			assert!(graph.authorized(&iid("bob"), &rid("x"), Privilege::Read));
		}

		#[test]
		fn versions_count_successful_loads() {
			let mut graph = graph();
			let store = MemorySecretStore::new();
			for expected in 1..=3 {
				let result = plan(&graph, &ResourceId::root(), &PolicyDocument::default())
					.unwrap()
					.apply(&mut graph, &store, &iid("admin"))
					.unwrap();
				assert_eq!(result.version, expected);
			}
		}
	}

	mod preview {
		use super::*;

		#[test]
		fn matches_apply_without_mutating() {
			let mut graph = graph();
			graph.add_resource(Resource::new(rid("x"), ResourceKind::Variable, iid("admin")));
			graph.grant(&iid("bob"), &rid("x"), Privilege::Read);
			let document = doc(
				"
- op: create_variable
  id: y
- op: grant
  identity: bob
  resource: x
  privilege: read
- op: grant
  identity: bob
  resource: y
  privilege: read
- op: grant
  identity: bob
  resource: y
  privilege: read
- op: revoke
  identity: bob
  resource: x
  privilege: read
",
			);
			let planned = plan(&graph, &ResourceId::root(), &document).unwrap();
			let preview = planned.preview(&graph);
			assert!(!graph.resource_exists(&rid("y")));

			let store = MemorySecretStore::new();
			let applied = planned.apply(&mut graph, &store, &iid("admin")).unwrap();
			assert_eq!(preview, applied);
			assert_eq!(applied.grants_added, 1);
			assert_eq!(applied.grants_revoked, 1);
		}
	}
}
