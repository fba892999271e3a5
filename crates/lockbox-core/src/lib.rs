// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core of the lockbox secrets vault.
//!
//! This crate provides:
//! - A permission graph of identities, resources and explicit grants
//! - A policy loader that validates a whole document before applying it and
//!   rolls back on failure
//! - A versioned, append-only secret store
//! - The [`SecretsEngine`] facade that authorizes every call before touching
//!   the store
//! - API-key authentication and sealed on-disk snapshots
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lockbox_core::{
//!     Identity, IdentityId, IdentityKind, MemorySecretStore, PolicyDocument, PolicyFormat,
//!     ResourceId, SecretsEngine,
//! };
//!
//! let admin = IdentityId::new("admin").unwrap();
//! let engine = SecretsEngine::bootstrap("demo".into(), admin.clone(), Arc::new(MemorySecretStore::new()));
//! let session = engine.session(Identity::new(admin, IdentityKind::User, "demo"));
//!
//! let document = PolicyDocument::parse("- op: create_variable\n  id: db/password\n", PolicyFormat::Yaml).unwrap();
//! let result = session.apply_policy(&ResourceId::root(), &document).unwrap();
//! assert_eq!(result.resources_created, 1);
//!
//! let id = ResourceId::new("db/password").unwrap();
//! session.set_secret(&id, "hunter2".into()).unwrap();
//! assert_eq!(session.get_secret(&id, None).unwrap().expose(), "hunter2");
//! ```

pub mod auth;
pub mod engine;
pub mod error;
pub mod graph;
pub mod persist;
pub mod policy;
pub mod secret;
pub mod store;
pub mod types;

pub use auth::{ApiKeyAuthenticator, Authenticator, CredentialRecord, Credentials};
pub use engine::{SecretsEngine, Session};
pub use error::{AuthError, PersistError, PolicyError, StoreError, VaultError, VaultResult};
pub use graph::PermissionGraph;
pub use persist::{
	FileSnapshotStore, MasterKey, MemorySnapshotStore, SecretSlot, SnapshotLock, SnapshotStore,
	VaultSnapshot,
};
pub use policy::{PolicyDocument, PolicyFormat, PolicyResult, Statement};
pub use secret::{SecretValue, MAX_SECRET_VALUE_SIZE};
pub use store::{MemorySecretStore, SecretStore};
pub use types::{
	Grant, Identity, IdentityId, IdentityKind, Privilege, PrivilegeSet, Resource, ResourceId,
	ResourceKind, SecretVersion, VersionInfo, ROOT_POLICY,
};
