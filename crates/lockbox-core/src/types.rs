// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core type definitions for the vault.
//!
//! - **Id newtypes**: validated hierarchical identifiers for resources and identities
//! - **Kinds and privileges**: closed enumerations used by the permission graph
//! - **Identity / Resource**: the principals and objects under access control
//! - **Secret versions**: immutable, numbered snapshots of a variable's value

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::secret::SecretValue;

/// Id of the root policy branch that every vault starts with.
pub const ROOT_POLICY: &str = "root";

/// Longest accepted identifier.
pub const MAX_ID_LEN: usize = 255;

/// An identifier failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id {id:?}: {reason}")]
pub struct InvalidId {
	pub id: String,
	pub reason: &'static str,
}

fn validate_id(id: &str) -> Result<(), InvalidId> {
	let fail = |reason| {
		Err(InvalidId {
			id: id.to_string(),
			reason,
		})
	};

	if id.is_empty() {
		return fail("id must not be empty");
	}
	if id.len() > MAX_ID_LEN {
		return fail("id must be at most 255 characters");
	}
	if id.starts_with('/') || id.ends_with('/') {
		return fail("id must not start or end with '/'");
	}
	if id.contains("//") {
		return fail("id must not contain empty path segments");
	}
	if !id
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | '/'))
	{
		return fail("id may only contain ASCII letters, digits, and _ - . @ /");
	}

	Ok(())
}

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);

		impl $name {
			/// Parse and validate an identifier.
			pub fn new(id: impl Into<String>) -> Result<Self, InvalidId> {
				let id = id.into();
				validate_id(&id)?;
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_inner(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = InvalidId;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}

		impl TryFrom<String> for $name {
			type Error = InvalidId;

			fn try_from(id: String) -> Result<Self, Self::Error> {
				Self::new(id)
			}
		}

		impl From<$name> for String {
			fn from(id: $name) -> Self {
				id.0
			}
		}

		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
	};
}

define_id_type!(
	ResourceId,
	"Hierarchical identifier of a policy object, e.g. `app/ec2_instances/instance_access_key`."
);
define_id_type!(
	IdentityId,
	"Identifier of an authenticated principal (a user or a host)."
);

impl ResourceId {
	/// The root policy branch.
	pub fn root() -> Self {
		Self(ROOT_POLICY.to_string())
	}

	pub fn is_root(&self) -> bool {
		self.0 == ROOT_POLICY
	}

	/// Qualify a branch-relative id. Ids loaded under `root` are used as written.
	pub fn scoped(branch: &ResourceId, relative: &str) -> Result<Self, InvalidId> {
		if branch.is_root() {
			Self::new(relative)
		} else {
			Self::new(format!("{branch}/{relative}"))
		}
	}
}

impl From<&ResourceId> for IdentityId {
	/// Groups act as grantees under their resource id.
	fn from(id: &ResourceId) -> Self {
		Self(id.0.clone())
	}
}

// =============================================================================
// Kinds
// =============================================================================

/// Kind of a policy object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
	Variable,
	Policy,
	Group,
}

impl ResourceKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceKind::Variable => "variable",
			ResourceKind::Policy => "policy",
			ResourceKind::Group => "group",
		}
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"variable" => Ok(ResourceKind::Variable),
			"policy" => Ok(ResourceKind::Policy),
			"group" => Ok(ResourceKind::Group),
			other => Err(format!("unknown resource kind: {other}")),
		}
	}
}

/// Kind of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
	User,
	Host,
}

impl fmt::Display for IdentityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			IdentityKind::User => f.write_str("user"),
			IdentityKind::Host => f.write_str("host"),
		}
	}
}

// =============================================================================
// Privileges
// =============================================================================

/// A privilege that can be granted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
	Read,
	Write,
	Execute,
	Update,
}

impl Privilege {
	pub const ALL: [Privilege; 4] = [
		Privilege::Read,
		Privilege::Write,
		Privilege::Execute,
		Privilege::Update,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Privilege::Read => "read",
			Privilege::Write => "write",
			Privilege::Execute => "execute",
			Privilege::Update => "update",
		}
	}

	fn bit(self) -> u8 {
		match self {
			Privilege::Read => 1,
			Privilege::Write => 1 << 1,
			Privilege::Execute => 1 << 2,
			Privilege::Update => 1 << 3,
		}
	}
}

impl fmt::Display for Privilege {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Privilege {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"read" => Ok(Privilege::Read),
			"write" => Ok(Privilege::Write),
			"execute" => Ok(Privilege::Execute),
			"update" => Ok(Privilege::Update),
			other => Err(format!("unknown privilege: {other}")),
		}
	}
}

/// Set of privileges held by one identity on one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PrivilegeSet(u8);

impl PrivilegeSet {
	pub fn empty() -> Self {
		Self(0)
	}

	pub fn all() -> Self {
		Privilege::ALL.into_iter().collect()
	}

	pub fn contains(&self, privilege: Privilege) -> bool {
		self.0 & privilege.bit() != 0
	}

	/// Returns true if the privilege was not already present.
	pub fn insert(&mut self, privilege: Privilege) -> bool {
		let added = !self.contains(privilege);
		self.0 |= privilege.bit();
		added
	}

	/// Returns true if the privilege was present.
	pub fn remove(&mut self, privilege: Privilege) -> bool {
		let removed = self.contains(privilege);
		self.0 &= !privilege.bit();
		removed
	}

	pub fn is_empty(&self) -> bool {
		self.0 == 0
	}

	pub fn iter(&self) -> impl Iterator<Item = Privilege> + '_ {
		Privilege::ALL.into_iter().filter(|p| self.contains(*p))
	}
}

impl FromIterator<Privilege> for PrivilegeSet {
	fn from_iter<I: IntoIterator<Item = Privilege>>(iter: I) -> Self {
		let mut set = PrivilegeSet::empty();
		for privilege in iter {
			set.insert(privilege);
		}
		set
	}
}

// =============================================================================
// Principals and Resources
// =============================================================================

/// An authenticated principal, valid for the lifetime of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub id: IdentityId,
	pub kind: IdentityKind,
	/// Vault account the identity authenticated against.
	pub account: String,
	pub authenticated_at: DateTime<Utc>,
}

impl Identity {
	pub fn new(id: IdentityId, kind: IdentityKind, account: impl Into<String>) -> Self {
		Self {
			id,
			kind,
			account: account.into(),
			authenticated_at: Utc::now(),
		}
	}
}

/// An addressable object under permission control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
	pub id: ResourceId,
	pub kind: ResourceKind,
	pub owner: IdentityId,
	pub created_at: DateTime<Utc>,
}

impl Resource {
	pub fn new(id: ResourceId, kind: ResourceKind, owner: IdentityId) -> Self {
		Self {
			id,
			kind,
			owner,
			created_at: Utc::now(),
		}
	}
}

/// A (identity, resource, privilege) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
	pub identity: IdentityId,
	pub resource: ResourceId,
	pub privilege: Privilege,
}

// =============================================================================
// Secret Versions
// =============================================================================

/// One immutable snapshot of a variable's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersion {
	/// Version number (1-indexed, sequential).
	pub version: u32,
	pub value: SecretValue,
	pub created_at: DateTime<Utc>,
	pub created_by: Option<IdentityId>,
}

impl SecretVersion {
	pub fn info(&self) -> VersionInfo {
		VersionInfo {
			version: self.version,
			created_at: self.created_at,
			created_by: self.created_by.clone(),
		}
	}
}

/// Version metadata without the value; safe to log and list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
	pub version: u32,
	pub created_at: DateTime<Utc>,
	pub created_by: Option<IdentityId>,
}
