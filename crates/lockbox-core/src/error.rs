// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the vault core.

use thiserror::Error;

use crate::types::{IdentityId, InvalidId, Privilege, ResourceId};

/// Result type alias for engine operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Authentication failures. Fatal to the call; never retried by the core.
#[derive(Debug, Error)]
pub enum AuthError {
	/// Unknown login or wrong key. Both cases share one error so callers
	/// cannot probe for valid logins.
	#[error("invalid credentials")]
	InvalidCredentials,

	#[error("identity already registered: {0}")]
	AlreadyRegistered(IdentityId),

	#[error("unknown identity: {0}")]
	UnknownIdentity(IdentityId),

	#[error("credential hashing failed: {0}")]
	Hashing(String),
}

/// Secret store failures.
#[derive(Debug, Error)]
pub enum StoreError {
	/// Unknown resource, or a variable that has no value yet.
	#[error("secret not found: {0}")]
	NotFound(ResourceId),

	#[error("secret version not found: {resource} v{version}")]
	VersionNotFound { resource: ResourceId, version: u32 },

	#[error("secret already exists: {0}")]
	AlreadyExists(ResourceId),

	#[error("storage error: {0}")]
	Storage(String),
}

impl StoreError {
	pub fn is_not_found(&self) -> bool {
		matches!(
			self,
			StoreError::NotFound(_) | StoreError::VersionNotFound { .. }
		)
	}
}

/// Policy document failures. Each carries the zero-based statement index when
/// one statement is to blame.
#[derive(Debug, Error)]
pub enum PolicyError {
	#[error("policy parse error{}: {message}", at(.statement))]
	Parse {
		statement: Option<usize>,
		message: String,
	},

	#[error("policy validation error at statement #{statement}: {message}")]
	Validation { statement: usize, message: String },

	#[error("policy apply error at statement #{statement}: {message} (rolled back)")]
	Apply { statement: usize, message: String },

	#[error("policy branch not found: {0}")]
	BranchNotFound(ResourceId),
}

fn at(statement: &Option<usize>) -> String {
	match statement {
		Some(index) => format!(" at statement #{index}"),
		None => String::new(),
	}
}

impl PolicyError {
	pub fn parse(statement: Option<usize>, message: impl Into<String>) -> Self {
		Self::Parse {
			statement,
			message: message.into(),
		}
	}

	pub fn validation(statement: usize, message: impl Into<String>) -> Self {
		Self::Validation {
			statement,
			message: message.into(),
		}
	}
}

/// Persistence adapter failures.
#[derive(Debug, Error)]
pub enum PersistError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),

	#[error("failed to restrict permissions on {}: {source}", .path.display())]
	Permissions {
		path: std::path::PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid master key: {0}")]
	InvalidKey(String),

	#[error("failed to seal secret value: {0}")]
	Seal(String),

	#[error("failed to unseal secret value (wrong master key?): {0}")]
	Unseal(String),

	#[error("corrupted snapshot: {0}")]
	Corrupted(String),
}

/// Errors surfaced by the secrets engine.
#[derive(Debug, Error)]
pub enum VaultError {
	// =========================================================================
	// Caller Errors
	// =========================================================================
	#[error(transparent)]
	Auth(#[from] AuthError),

	#[error("{identity} lacks {privilege} privilege on {resource}")]
	Unauthorized {
		identity: IdentityId,
		resource: ResourceId,
		privilege: Privilege,
	},

	#[error("invalid value: {0}")]
	InvalidValue(String),

	#[error(transparent)]
	InvalidId(#[from] InvalidId),

	// =========================================================================
	// Component Errors
	// =========================================================================
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Policy(#[from] PolicyError),

	#[error(transparent)]
	Persist(#[from] PersistError),
}

impl VaultError {
	/// Returns true if this error should be logged at error level.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			VaultError::Store(StoreError::Storage(_))
				| VaultError::Policy(PolicyError::Apply { .. })
				| VaultError::Persist(_)
				| VaultError::Auth(AuthError::Hashing(_))
		)
	}

	/// Returns true for the "no such secret or version" family.
	pub fn is_not_found(&self) -> bool {
		matches!(self, VaultError::Store(e) if e.is_not_found())
	}

	/// HTTP status code for a transport layer built on the engine.
	pub fn status_code(&self) -> u16 {
		match self {
			// 401 Unauthorized
			VaultError::Auth(AuthError::InvalidCredentials) => 401,

			// 403 Forbidden
			VaultError::Unauthorized { .. } => 403,

			// 404 Not Found
			VaultError::Store(StoreError::NotFound(_))
			| VaultError::Store(StoreError::VersionNotFound { .. })
			| VaultError::Policy(PolicyError::BranchNotFound(_))
			| VaultError::Auth(AuthError::UnknownIdentity(_)) => 404,

			// 409 Conflict
			VaultError::Store(StoreError::AlreadyExists(_))
			| VaultError::Auth(AuthError::AlreadyRegistered(_)) => 409,

			// 422 Unprocessable
			VaultError::InvalidValue(_)
			| VaultError::InvalidId(_)
			| VaultError::Policy(PolicyError::Parse { .. })
			| VaultError::Policy(PolicyError::Validation { .. }) => 422,

			// 500 Internal Server Error
			VaultError::Store(StoreError::Storage(_))
			| VaultError::Policy(PolicyError::Apply { .. })
			| VaultError::Persist(_)
			| VaultError::Auth(AuthError::Hashing(_)) => 500,
		}
	}
}
