// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secrets engine: the single entry point for vault operations.
//!
//! The engine owns the permission graph and the secret store for one vault.
//! Every operation runs on behalf of an authenticated [`Identity`] through a
//! [`Session`], and the graph is consulted before the store is touched.
//!
//! # Locking
//!
//! The graph lives behind a single-writer, multi-reader lock. Policy loads and
//! identity registration take the write lock for their whole check-and-mutate
//! sequence; reads and writes of secret values only take the read lock for the
//! access decision. Parsing a policy document happens before any lock is taken.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, StoreError, VaultError, VaultResult};
use crate::graph::PermissionGraph;
use crate::persist::{IdentityRecord, SecretSlot, VaultSnapshot};
use crate::policy::{self, PolicyDocument, PolicyResult};
use crate::secret::{SecretValue, MAX_SECRET_VALUE_SIZE};
use crate::store::SecretStore;
use crate::types::{
	Identity, IdentityId, IdentityKind, Privilege, Resource, ResourceId, ResourceKind, VersionInfo,
};

/// Handle to one vault, shared by every caller for the life of the process.
pub struct SecretsEngine<S: SecretStore> {
	account: String,
	graph: RwLock<PermissionGraph>,
	store: Arc<S>,
}

impl<S: SecretStore> SecretsEngine<S> {
	/// Start an empty vault whose `root` policy is owned by `admin`.
	#[instrument(skip_all, fields(account = %account, admin = %admin))]
	pub fn bootstrap(account: String, admin: IdentityId, store: Arc<S>) -> Self {
		let mut graph = PermissionGraph::new();
		graph.add_identity(admin.clone(), IdentityKind::User);
		graph.add_resource(Resource::new(ResourceId::root(), ResourceKind::Policy, admin));
		info!("vault bootstrapped");

		Self {
			account,
			graph: RwLock::new(graph),
			store,
		}
	}

	/// Rebuild a vault from a snapshot. `store` must not already hold any of
	/// the snapshot's slots.
	#[instrument(skip_all, fields(account = %snapshot.account))]
	pub fn restore(snapshot: VaultSnapshot, store: Arc<S>) -> VaultResult<Self> {
		let mut graph = PermissionGraph::new();
		for record in snapshot.identities {
			graph.add_identity(record.id, record.kind);
		}
		for resource in snapshot.resources {
			let id = resource.id.clone();
			if !graph.add_resource(resource) {
				return Err(StoreError::Storage(format!("duplicate resource {id} in snapshot")).into());
			}
		}
		if !graph.resource_exists(&ResourceId::root()) {
			return Err(StoreError::Storage("snapshot has no root policy".to_string()).into());
		}
		for grant in snapshot.grants {
			graph.grant(&grant.identity, &grant.resource, grant.privilege);
		}
		for (branch, version) in snapshot.policy_versions {
			graph.set_policy_version(branch, version);
		}
		for slot in snapshot.secrets {
			store.restore(&slot.id, slot.versions)?;
		}
		info!("vault restored");

		Ok(Self {
			account: snapshot.account,
			graph: RwLock::new(graph),
			store,
		})
	}

	pub fn account(&self) -> &str {
		&self.account
	}

	pub fn store(&self) -> &Arc<S> {
		&self.store
	}

	/// Bind an authenticated identity to this engine.
	pub fn session(&self, identity: Identity) -> Session<'_, S> {
		Session {
			engine: self,
			identity,
		}
	}

	pub fn resource_exists(&self, id: &ResourceId) -> bool {
		self.graph.read().resource_exists(id)
	}

	pub fn authorized(&self, identity: &IdentityId, resource: &ResourceId, privilege: Privilege) -> bool {
		self.graph.read().authorized(identity, resource, privilege)
	}

	pub fn identity_kind(&self, id: &IdentityId) -> Option<IdentityKind> {
		self.graph.read().identity_kind(id)
	}

	/// Capture the current state. Credential records are added by the caller,
	/// who owns the authenticator.
	pub fn snapshot(&self) -> VaultResult<VaultSnapshot> {
		let graph = self.graph.read();

		let mut resources: Vec<Resource> = graph.resources().cloned().collect();
		resources.sort_by(|a, b| a.id.cmp(&b.id));

		let mut identities: Vec<IdentityRecord> = graph
			.identities()
			.map(|(id, kind)| IdentityRecord { id: id.clone(), kind })
			.collect();
		identities.sort_by(|a, b| a.id.cmp(&b.id));

		let mut grants: Vec<_> = graph.grants().collect();
		grants.sort_by(|a, b| {
			(&a.identity, &a.resource, a.privilege.as_str())
				.cmp(&(&b.identity, &b.resource, b.privilege.as_str()))
		});

		let policy_versions: BTreeMap<ResourceId, u32> = graph
			.policy_versions()
			.map(|(id, v)| (id.clone(), v))
			.collect();

		let secrets = self
			.store
			.list()
			.into_iter()
			.map(|id| {
				let versions = self.store.history(&id)?;
				Ok(SecretSlot { id, versions })
			})
			.collect::<Result<Vec<_>, StoreError>>()?;

		Ok(VaultSnapshot {
			account: self.account.clone(),
			resources,
			identities,
			grants,
			policy_versions,
			credentials: Vec::new(),
			secrets,
		})
	}

	fn authorize(
		graph: &PermissionGraph,
		identity: &Identity,
		resource: &ResourceId,
		privilege: Privilege,
	) -> VaultResult<()> {
		if graph.authorized(&identity.id, resource, privilege) {
			debug!(identity = %identity.id, resource = %resource, privilege = %privilege, "access allowed");
			Ok(())
		} else {
			warn!(identity = %identity.id, resource = %resource, privilege = %privilege, "access denied");
			Err(VaultError::Unauthorized {
				identity: identity.id.clone(),
				resource: resource.clone(),
				privilege,
			})
		}
	}
}

impl<S: SecretStore> std::fmt::Debug for SecretsEngine<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SecretsEngine")
			.field("account", &self.account)
			.finish_non_exhaustive()
	}
}

/// Engine operations on behalf of one authenticated identity.
///
/// Each call is an independent transaction against the shared graph and store.
#[derive(Debug)]
pub struct Session<'a, S: SecretStore> {
	engine: &'a SecretsEngine<S>,
	identity: Identity,
}

impl<'a, S: SecretStore> Session<'a, S> {
	pub fn whoami(&self) -> &Identity {
		&self.identity
	}

	/// Load a policy document into a branch. Requires `update` on the branch.
	///
	/// The whole document is validated before anything changes, and a failure
	/// while applying is rolled back. New resources are owned by the caller.
	#[instrument(skip_all, fields(identity = %self.identity.id, branch = %branch, statements = document.len()))]
	pub fn apply_policy(&self, branch: &ResourceId, document: &PolicyDocument) -> VaultResult<PolicyResult> {
		let mut graph = self.engine.graph.write();
		SecretsEngine::<S>::authorize(&graph, &self.identity, branch, Privilege::Update)?;

		let plan = policy::plan(&graph, branch, document)?;
		let result = plan.apply(&mut graph, self.engine.store.as_ref(), &self.identity.id)?;
		Ok(result)
	}

	/// Validate a document and report what loading it would change.
	#[instrument(skip_all, fields(identity = %self.identity.id, branch = %branch))]
	pub fn dry_run_policy(&self, branch: &ResourceId, document: &PolicyDocument) -> VaultResult<PolicyResult> {
		let graph = self.engine.graph.read();
		SecretsEngine::<S>::authorize(&graph, &self.identity, branch, Privilege::Update)?;

		let plan = policy::plan(&graph, branch, document)?;
		Ok(plan.preview(&graph))
	}

	/// Latest value, or a specific 1-based version. Requires `read`.
	#[instrument(skip(self), fields(identity = %self.identity.id))]
	pub fn get_secret(&self, id: &ResourceId, version: Option<u32>) -> VaultResult<SecretValue> {
		self.check(id, Privilege::Read)?;
		let found = self.engine.store.get(id, version)?;
		Ok(found.value.clone())
	}

	/// Read several secrets at once. Every id must be readable, otherwise the
	/// call fails on the first one that is not and nothing is returned.
	#[instrument(skip_all, fields(identity = %self.identity.id, count = ids.len()))]
	pub fn get_secrets(&self, ids: &[ResourceId]) -> VaultResult<Vec<(ResourceId, SecretValue)>> {
		{
			let graph = self.engine.graph.read();
			for id in ids {
				SecretsEngine::<S>::authorize(&graph, &self.identity, id, Privilege::Read)?;
			}
		}

		ids.iter()
			.map(|id| {
				let found = self.engine.store.get(id, None)?;
				Ok((id.clone(), found.value.clone()))
			})
			.collect()
	}

	/// Append a new version. Requires `write`.
	#[instrument(skip(self, value), fields(identity = %self.identity.id, size = value.len()))]
	pub fn set_secret(&self, id: &ResourceId, value: SecretValue) -> VaultResult<u32> {
		self.check(id, Privilege::Write)?;
		validate_value(&value)?;

		let version = self.engine.store.set(id, value, Some(&self.identity.id))?;
		info!(resource = %id, version, "secret version added");
		Ok(version)
	}

	/// Invalidate a secret by appending a value no consumer uses. Requires
	/// `write`.
	#[instrument(skip(self, unusable), fields(identity = %self.identity.id))]
	pub fn rotate_secret(&self, id: &ResourceId, unusable: SecretValue) -> VaultResult<u32> {
		self.check(id, Privilege::Write)?;
		validate_value(&unusable)?;

		let version = self.engine.store.rotate(id, unusable, Some(&self.identity.id))?;
		info!(resource = %id, version, "secret rotated");
		Ok(version)
	}

	/// Version metadata, oldest first. Requires `read`.
	#[instrument(skip(self), fields(identity = %self.identity.id))]
	pub fn secret_versions(&self, id: &ResourceId) -> VaultResult<Vec<VersionInfo>> {
		self.check(id, Privilege::Read)?;
		Ok(self.engine.store.versions(id)?)
	}

	/// Resources the caller owns or holds any privilege on, sorted by id.
	pub fn list_resources(&self, kind: Option<ResourceKind>) -> Vec<Resource> {
		let graph = self.engine.graph.read();
		let mut resources: Vec<Resource> = graph
			.visible_to(&self.identity.id)
			.filter(|r| kind.map_or(true, |k| r.kind == k))
			.cloned()
			.collect();
		resources.sort_by(|a, b| a.id.cmp(&b.id));
		resources
	}

	/// Make a new identity known to the graph so policies can grant to it.
	/// Requires `update` on `root`.
	#[instrument(skip(self), fields(identity = %self.identity.id))]
	pub fn register_identity(&self, id: IdentityId, kind: IdentityKind) -> VaultResult<()> {
		let mut graph = self.engine.graph.write();
		SecretsEngine::<S>::authorize(&graph, &self.identity, &ResourceId::root(), Privilege::Update)?;

		if graph.role_exists(&id) {
			return Err(AuthError::AlreadyRegistered(id).into());
		}
		graph.add_identity(id.clone(), kind);
		info!(registered = %id, kind = %kind, "identity registered");
		Ok(())
	}

	fn check(&self, id: &ResourceId, privilege: Privilege) -> VaultResult<()> {
		let graph = self.engine.graph.read();
		SecretsEngine::<S>::authorize(&graph, &self.identity, id, privilege)
	}
}

fn validate_value(value: &SecretValue) -> VaultResult<()> {
	if value.len() > MAX_SECRET_VALUE_SIZE {
		return Err(VaultError::InvalidValue(format!(
			"secret value exceeds maximum size of {MAX_SECRET_VALUE_SIZE} bytes"
		)));
	}
	Ok(())
}
