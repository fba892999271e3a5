// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable snapshots of a vault.
//!
//! A [`VaultSnapshot`] is the full state of one vault: graph, policy versions,
//! credential hashes and the append-only version log of every secret.
//! [`FileSnapshotStore`] writes it as JSON with every secret value sealed
//! under AES-256-GCM. The resource id and version number are bound in as
//! associated data, so a ciphertext cannot be moved to another slot.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng, Payload},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::auth::CredentialRecord;
use crate::error::PersistError;
use crate::secret::SecretValue;
use crate::types::{Grant, IdentityId, IdentityKind, Resource, ResourceId, SecretVersion};

/// On-disk format version.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Master key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

// =============================================================================
// Snapshot model
// =============================================================================

/// Complete state of one vault.
#[derive(Debug, Clone, Default)]
pub struct VaultSnapshot {
	pub account: String,
	pub resources: Vec<Resource>,
	pub identities: Vec<IdentityRecord>,
	pub grants: Vec<Grant>,
	pub policy_versions: BTreeMap<ResourceId, u32>,
	pub credentials: Vec<CredentialRecord>,
	pub secrets: Vec<SecretSlot>,
}

impl VaultSnapshot {
	pub fn with_credentials(mut self, credentials: Vec<CredentialRecord>) -> Self {
		self.credentials = credentials;
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
	pub id: IdentityId,
	pub kind: IdentityKind,
}

/// Version log of one variable, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSlot {
	pub id: ResourceId,
	pub versions: Vec<SecretVersion>,
}

/// Load and save whole-vault snapshots.
pub trait SnapshotStore: Send + Sync {
	/// Returns `None` if nothing has been saved yet.
	fn load(&self) -> Result<Option<VaultSnapshot>, PersistError>;

	fn save(&self, snapshot: &VaultSnapshot) -> Result<(), PersistError>;
}

// =============================================================================
// Master key
// =============================================================================

/// 256-bit key that seals secret values at rest.
pub struct MasterKey(Zeroizing<[u8; KEY_SIZE]>);

impl MasterKey {
	pub fn generate() -> Self {
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(&mut key[..]);
		Self(key)
	}

	/// Parse a hex-encoded key (surrounding whitespace ignored).
	pub fn from_hex(text: &str) -> Result<Self, PersistError> {
		let bytes = Zeroizing::new(
			hex::decode(text.trim()).map_err(|e| PersistError::InvalidKey(e.to_string()))?,
		);
		if bytes.len() != KEY_SIZE {
			return Err(PersistError::InvalidKey(format!(
				"expected {KEY_SIZE} bytes, got {}",
				bytes.len()
			)));
		}
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		key.copy_from_slice(&bytes);
		Ok(Self(key))
	}

	pub fn to_hex(&self) -> Zeroizing<String> {
		Zeroizing::new(hex::encode(self.0.as_slice()))
	}

	pub fn from_file(path: &Path) -> Result<Self, PersistError> {
		let text = Zeroizing::new(fs::read_to_string(path)?);
		Self::from_hex(&text)
	}

	/// Write the key as hex, readable only by the owner.
	pub fn write_file(&self, path: &Path) -> Result<(), PersistError> {
		write_private(path, self.to_hex().as_bytes())
	}

	fn cipher(&self) -> Aes256Gcm {
		Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.as_slice()))
	}

	fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>), PersistError> {
		let mut nonce = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce);
		let ciphertext = self
			.cipher()
			.encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
			.map_err(|e| PersistError::Seal(e.to_string()))?;
		Ok((nonce, ciphertext))
	}

	fn unseal(&self, aad: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, PersistError> {
		if nonce.len() != NONCE_SIZE {
			return Err(PersistError::Corrupted(format!(
				"nonce must be {NONCE_SIZE} bytes, got {}",
				nonce.len()
			)));
		}
		self.cipher()
			.decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
			.map(Zeroizing::new)
			.map_err(|e| PersistError::Unseal(e.to_string()))
	}
}

impl std::fmt::Debug for MasterKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("MasterKey([REDACTED])")
	}
}

// =============================================================================
// File store
// =============================================================================

#[derive(Serialize, Deserialize)]
struct PersistedVault {
	format: u32,
	account: String,
	resources: Vec<Resource>,
	identities: Vec<IdentityRecord>,
	grants: Vec<Grant>,
	policy_versions: BTreeMap<ResourceId, u32>,
	credentials: Vec<CredentialRecord>,
	secrets: Vec<PersistedSlot>,
}

#[derive(Serialize, Deserialize)]
struct PersistedSlot {
	id: ResourceId,
	versions: Vec<PersistedVersion>,
}

#[derive(Serialize, Deserialize)]
struct PersistedVersion {
	version: u32,
	created_at: DateTime<Utc>,
	created_by: Option<IdentityId>,
	/// base64
	nonce: String,
	/// base64
	ciphertext: String,
}

fn aad(id: &ResourceId, version: u32) -> Vec<u8> {
	format!("{id}#{version}").into_bytes()
}

/// JSON snapshot file with sealed secret values and 0600 permissions.
#[derive(Debug)]
pub struct FileSnapshotStore {
	path: PathBuf,
	key: MasterKey,
}

impl FileSnapshotStore {
	pub fn new(path: impl Into<PathBuf>, key: MasterKey) -> Self {
		Self {
			path: path.into(),
			key,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Block until this process holds the lock on this snapshot.
	pub fn lock(&self) -> Result<SnapshotLock, PersistError> {
		SnapshotLock::acquire(&self.path)
	}

	pub fn try_lock(&self) -> Result<Option<SnapshotLock>, PersistError> {
		SnapshotLock::try_acquire(&self.path)
	}

	fn seal_slot(&self, slot: &SecretSlot) -> Result<PersistedSlot, PersistError> {
		let versions = slot
			.versions
			.iter()
			.map(|v| {
				let (nonce, ciphertext) =
					self.key.seal(&aad(&slot.id, v.version), v.value.expose().as_bytes())?;
				Ok(PersistedVersion {
					version: v.version,
					created_at: v.created_at,
					created_by: v.created_by.clone(),
					nonce: BASE64.encode(nonce),
					ciphertext: BASE64.encode(ciphertext),
				})
			})
			.collect::<Result<_, PersistError>>()?;
		Ok(PersistedSlot {
			id: slot.id.clone(),
			versions,
		})
	}

	fn unseal_slot(&self, slot: PersistedSlot) -> Result<SecretSlot, PersistError> {
		let versions = slot
			.versions
			.into_iter()
			.map(|v| {
				let nonce = BASE64
					.decode(&v.nonce)
					.map_err(|e| PersistError::Corrupted(format!("{} v{}: {e}", slot.id, v.version)))?;
				let ciphertext = BASE64
					.decode(&v.ciphertext)
					.map_err(|e| PersistError::Corrupted(format!("{} v{}: {e}", slot.id, v.version)))?;
				let plaintext = self.key.unseal(&aad(&slot.id, v.version), &nonce, &ciphertext)?;
				let text = std::str::from_utf8(&plaintext)
					.map_err(|e| PersistError::Corrupted(format!("{} v{}: {e}", slot.id, v.version)))?;
				Ok(SecretVersion {
					version: v.version,
					value: SecretValue::new(text),
					created_at: v.created_at,
					created_by: v.created_by,
				})
			})
			.collect::<Result<_, PersistError>>()?;
		Ok(SecretSlot {
			id: slot.id,
			versions,
		})
	}
}

impl SnapshotStore for FileSnapshotStore {
	#[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
	fn load(&self) -> Result<Option<VaultSnapshot>, PersistError> {
		if !self.path.exists() {
			return Ok(None);
		}

		let contents = fs::read_to_string(&self.path)?;
		let persisted: PersistedVault = serde_json::from_str(&contents)?;
		if persisted.format != SNAPSHOT_FORMAT {
			return Err(PersistError::Corrupted(format!(
				"unsupported snapshot format {}",
				persisted.format
			)));
		}

		let secrets = persisted
			.secrets
			.into_iter()
			.map(|slot| self.unseal_slot(slot))
			.collect::<Result<_, _>>()?;

		debug!("snapshot loaded");
		Ok(Some(VaultSnapshot {
			account: persisted.account,
			resources: persisted.resources,
			identities: persisted.identities,
			grants: persisted.grants,
			policy_versions: persisted.policy_versions,
			credentials: persisted.credentials,
			secrets,
		}))
	}

	#[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
	fn save(&self, snapshot: &VaultSnapshot) -> Result<(), PersistError> {
		let secrets = snapshot
			.secrets
			.iter()
			.map(|slot| self.seal_slot(slot))
			.collect::<Result<_, _>>()?;

		let persisted = PersistedVault {
			format: SNAPSHOT_FORMAT,
			account: snapshot.account.clone(),
			resources: snapshot.resources.clone(),
			identities: snapshot.identities.clone(),
			grants: snapshot.grants.clone(),
			policy_versions: snapshot.policy_versions.clone(),
			credentials: snapshot.credentials.clone(),
			secrets,
		};

		let contents = serde_json::to_string_pretty(&persisted)?;
		write_private(&self.path, contents.as_bytes())?;
		debug!("snapshot written");
		Ok(())
	}
}

/// Exclusive advisory lock on a snapshot file, released on drop.
///
/// Callers that load, mutate and save a snapshot hold the lock across the
/// whole cycle so that concurrent writers cannot drop each other's changes.
/// The lock lives in a sidecar `<snapshot>.lock` file.
#[derive(Debug)]
pub struct SnapshotLock {
	_file: File,
}

impl SnapshotLock {
	pub fn lock_path(snapshot: &Path) -> PathBuf {
		snapshot.with_extension("lock")
	}

	/// Block until the lock is free.
	pub fn acquire(snapshot: &Path) -> Result<Self, PersistError> {
		let lock_path = Self::lock_path(snapshot);
		let file = open_lock_file(&lock_path)?;
		file.lock_exclusive()?;
		debug!(lock_path = %lock_path.display(), "acquired snapshot lock");
		Ok(Self { _file: file })
	}

	/// Take the lock if no one else holds it.
	pub fn try_acquire(snapshot: &Path) -> Result<Option<Self>, PersistError> {
		let file = open_lock_file(&Self::lock_path(snapshot))?;
		match file.try_lock_exclusive() {
			Ok(()) => Ok(Some(Self { _file: file })),
			Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
			Err(e) => Err(e.into()),
		}
	}
}

fn open_lock_file(path: &Path) -> Result<File, PersistError> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}
	let file = OpenOptions::new()
		.read(true)
		.write(true)
		.create(true)
		.truncate(false)
		.open(path)?;
	Ok(file)
}

/// Write a file atomically (temp file, then rename) with owner-only access.
///
/// The temp file is created owner-only, so the contents are never readable
/// by others, not even before the rename.
fn write_private(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}

	let temp_path = path.with_extension("tmp");
	// A stale temp file keeps its old mode through `OpenOptions::mode`.
	match fs::remove_file(&temp_path) {
		Ok(()) => {}
		Err(e) if e.kind() == io::ErrorKind::NotFound => {}
		Err(e) => return Err(e.into()),
	}

	let mut options = OpenOptions::new();
	options.write(true).create_new(true);
	#[cfg(unix)]
	{
		use std::os::unix::fs::OpenOptionsExt;
		options.mode(0o600);
	}
	let mut file = options.open(&temp_path)?;

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
			drop(file);
			let _ = fs::remove_file(&temp_path);
			return Err(PersistError::Permissions {
				path: temp_path,
				source: e,
			});
		}
	}

	file.write_all(contents)?;
	file.sync_all()?;
	drop(file);

	fs::rename(&temp_path, path)?;
	Ok(())
}

// =============================================================================
// Memory store
// =============================================================================

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
	snapshot: Mutex<Option<VaultSnapshot>>,
}

impl MemorySnapshotStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl SnapshotStore for MemorySnapshotStore {
	fn load(&self) -> Result<Option<VaultSnapshot>, PersistError> {
		Ok(self.snapshot.lock().clone())
	}

	fn save(&self, snapshot: &VaultSnapshot) -> Result<(), PersistError> {
		*self.snapshot.lock() = Some(snapshot.clone());
		Ok(())
	}
}
