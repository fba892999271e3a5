// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Versioned storage for secret variable contents.
//!
//! A slot is created empty when a policy declares a variable. Every `set`
//! appends a new immutable version numbered from 1; nothing is ever deleted.
//! Authorization is not checked here; the engine does that before calling in.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::error::StoreError;
use crate::secret::SecretValue;
use crate::types::{IdentityId, ResourceId, SecretVersion, VersionInfo};

/// Storage backend for secret versions.
pub trait SecretStore: Send + Sync {
	/// Create an empty slot.
	fn create(&self, id: &ResourceId) -> Result<(), StoreError>;

	/// Append a version and return its number.
	fn set(
		&self,
		id: &ResourceId,
		value: SecretValue,
		created_by: Option<&IdentityId>,
	) -> Result<u32, StoreError>;

	/// Latest version, or the given 1-based version.
	fn get(&self, id: &ResourceId, version: Option<u32>) -> Result<SecretVersion, StoreError>;

	/// Append a value meant to invalidate the secret. There is no delete.
	fn rotate(
		&self,
		id: &ResourceId,
		unusable: SecretValue,
		created_by: Option<&IdentityId>,
	) -> Result<u32, StoreError> {
		self.set(id, unusable, created_by)
	}

	/// Ids of every slot, sorted.
	fn list(&self) -> Vec<ResourceId>;

	/// Version metadata, oldest first.
	fn versions(&self, id: &ResourceId) -> Result<Vec<VersionInfo>, StoreError>;

	/// Full version log, oldest first.
	fn history(&self, id: &ResourceId) -> Result<Vec<SecretVersion>, StoreError>;

	/// Recreate a slot from a persisted version log.
	fn restore(&self, id: &ResourceId, versions: Vec<SecretVersion>) -> Result<(), StoreError>;

	fn contains(&self, id: &ResourceId) -> bool;

	/// Drop a slot that holds no versions. Returns false if the slot does not
	/// exist. Used only to undo an uncommitted `create`.
	fn discard_empty(&self, id: &ResourceId) -> Result<bool, StoreError>;
}

type Slot = Arc<Mutex<Vec<SecretVersion>>>;

/// In-memory store.
///
/// The slot map sits behind a reader-writer lock that is only write-locked to
/// add or drop slots. Each slot has its own mutex, so appends to one variable
/// are serialized while other variables proceed independently.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
	slots: RwLock<HashMap<ResourceId, Slot>>,
}

impl MemorySecretStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn slot(&self, id: &ResourceId) -> Result<Slot, StoreError> {
		self.slots
			.read()
			.get(id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(id.clone()))
	}
}

impl SecretStore for MemorySecretStore {
	fn create(&self, id: &ResourceId) -> Result<(), StoreError> {
		let mut slots = self.slots.write();
		if slots.contains_key(id) {
			return Err(StoreError::AlreadyExists(id.clone()));
		}
		slots.insert(id.clone(), Slot::default());
		Ok(())
	}

	fn set(
		&self,
		id: &ResourceId,
		value: SecretValue,
		created_by: Option<&IdentityId>,
	) -> Result<u32, StoreError> {
		let slot = self.slot(id)?;
		let mut versions = slot.lock();

		let next = versions.last().map(|v| v.version).unwrap_or(0);
		let version = next
			.checked_add(1)
			.ok_or_else(|| StoreError::Storage(format!("version counter exhausted for {id}")))?;

		versions.push(SecretVersion {
			version,
			value,
			created_at: Utc::now(),
			created_by: created_by.cloned(),
		});
		Ok(version)
	}

	fn get(&self, id: &ResourceId, version: Option<u32>) -> Result<SecretVersion, StoreError> {
		let slot = self.slot(id)?;
		let versions = slot.lock();

		match version {
			None => versions
				.last()
				.cloned()
				.ok_or_else(|| StoreError::NotFound(id.clone())),
			Some(n) => n
				.checked_sub(1)
				.and_then(|index| versions.get(index as usize))
				.cloned()
				.ok_or_else(|| StoreError::VersionNotFound {
					resource: id.clone(),
					version: n,
				}),
		}
	}

	fn list(&self) -> Vec<ResourceId> {
		let mut ids: Vec<ResourceId> = self.slots.read().keys().cloned().collect();
		ids.sort();
		ids
	}

	fn versions(&self, id: &ResourceId) -> Result<Vec<VersionInfo>, StoreError> {
		let slot = self.slot(id)?;
		let versions = slot.lock();
		Ok(versions.iter().map(SecretVersion::info).collect())
	}

	fn history(&self, id: &ResourceId) -> Result<Vec<SecretVersion>, StoreError> {
		let slot = self.slot(id)?;
		let versions = slot.lock();
		Ok(versions.clone())
	}

	fn restore(&self, id: &ResourceId, versions: Vec<SecretVersion>) -> Result<(), StoreError> {
		for (index, v) in versions.iter().enumerate() {
			if v.version as usize != index + 1 {
				return Err(StoreError::Storage(format!(
					"version log for {id} is not contiguous: expected v{}, found v{}",
					index + 1,
					v.version
				)));
			}
		}

		let mut slots = self.slots.write();
		if slots.contains_key(id) {
			return Err(StoreError::AlreadyExists(id.clone()));
		}
		slots.insert(id.clone(), Arc::new(Mutex::new(versions)));
		Ok(())
	}

	fn contains(&self, id: &ResourceId) -> bool {
		self.slots.read().contains_key(id)
	}

	fn discard_empty(&self, id: &ResourceId) -> Result<bool, StoreError> {
		let mut slots = self.slots.write();
		let Some(slot) = slots.get(id) else {
			return Ok(false);
		};
		if !slot.lock().is_empty() {
			return Err(StoreError::Storage(format!(
				"refusing to discard {id}: slot holds versions"
			)));
		}
		slots.remove(id);
		Ok(true)
	}
}
