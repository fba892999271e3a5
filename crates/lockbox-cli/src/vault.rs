// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Opening, authenticating against and saving the on-disk vault.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use lockbox_config::LockboxConfig;
use lockbox_core::{
	ApiKeyAuthenticator, Authenticator, Credentials, FileSnapshotStore, Identity, IdentityId,
	IdentityKind, MasterKey, MemorySecretStore, SecretValue, SecretsEngine, Session,
	SnapshotLock, SnapshotStore,
};

/// A vault loaded from its snapshot file for the duration of one command.
///
/// The snapshot lock is held from load until the value is dropped, so two
/// `lockbox` processes touching the same vault run one after the other.
pub struct Vault {
	_lock: SnapshotLock,
	config: LockboxConfig,
	snapshots: FileSnapshotStore,
	auth: ApiKeyAuthenticator,
	engine: SecretsEngine<MemorySecretStore>,
}

impl Vault {
	/// Create a new vault owned by `admin` and return the admin's API key.
	pub fn init(config: LockboxConfig, admin: IdentityId) -> Result<(Self, SecretValue)> {
		let data_file = &config.vault.data_file;
		let lock = lock_vault(data_file)?;
		if data_file.exists() {
			bail!("vault already exists at {}", data_file.display());
		}

		let key = init_master_key(&config)?;
		let snapshots = FileSnapshotStore::new(data_file, key);

		let auth = ApiKeyAuthenticator::new(config.vault.account.clone());
		let api_key = auth
			.register(&admin, IdentityKind::User)
			.context("failed to issue admin API key")?;
		let engine = SecretsEngine::bootstrap(
			config.vault.account.clone(),
			admin,
			Arc::new(MemorySecretStore::new()),
		);

		let vault = Self {
			_lock: lock,
			config,
			snapshots,
			auth,
			engine,
		};
		vault.save()?;
		info!(data_file = %vault.config.vault.data_file.display(), "vault initialized");
		Ok((vault, api_key))
	}

	/// Open an existing vault.
	pub fn open(config: LockboxConfig) -> Result<Self> {
		let lock = lock_vault(&config.vault.data_file)?;
		let key = load_master_key(&config)?;
		let snapshots = FileSnapshotStore::new(&config.vault.data_file, key);

		let snapshot = snapshots
			.load()
			.with_context(|| format!("failed to read {}", config.vault.data_file.display()))?;
		let Some(snapshot) = snapshot else {
			bail!(
				"no vault at {}; run `lockbox init --admin <id>` first",
				config.vault.data_file.display()
			);
		};
		if snapshot.account != config.vault.account {
			bail!(
				"vault at {} belongs to account '{}', not '{}'",
				config.vault.data_file.display(),
				snapshot.account,
				config.vault.account
			);
		}

		let auth =
			ApiKeyAuthenticator::from_records(snapshot.account.clone(), snapshot.credentials.clone());
		let engine = SecretsEngine::restore(snapshot, Arc::new(MemorySecretStore::new()))
			.context("vault snapshot is inconsistent")?;
		debug!(account = %engine.account(), "vault opened");

		Ok(Self {
			_lock: lock,
			config,
			snapshots,
			auth,
			engine,
		})
	}

	/// Authenticate the configured login with the API key from the environment.
	pub fn login(&self) -> Result<Identity> {
		let Some(login) = self.config.auth.login.as_deref() else {
			bail!("no login configured; pass --login or set LOCKBOX_LOGIN");
		};
		let Some(api_key) = self.config.auth.api_key.clone() else {
			bail!("no API key configured; set LOCKBOX_API_KEY or LOCKBOX_API_KEY_FILE");
		};
		let login = IdentityId::new(login)?;

		Ok(self.auth.authenticate(&Credentials::new(login, api_key))?)
	}

	pub fn session(&self, identity: Identity) -> Session<'_, MemorySecretStore> {
		self.engine.session(identity)
	}

	pub fn engine(&self) -> &SecretsEngine<MemorySecretStore> {
		&self.engine
	}

	pub fn auth(&self) -> &ApiKeyAuthenticator {
		&self.auth
	}

	/// Write the current state, including API-key hashes, back to disk.
	pub fn save(&self) -> Result<()> {
		let snapshot = self.engine.snapshot()?.with_credentials(self.auth.records());
		self.snapshots
			.save(&snapshot)
			.with_context(|| format!("failed to write {}", self.snapshots.path().display()))?;
		debug!("vault saved");
		Ok(())
	}
}

fn lock_vault(data_file: &Path) -> Result<SnapshotLock> {
	SnapshotLock::acquire(data_file).with_context(|| {
		format!(
			"failed to lock {}",
			SnapshotLock::lock_path(data_file).display()
		)
	})
}

fn load_master_key(config: &LockboxConfig) -> Result<MasterKey> {
	if let Some(hex) = &config.vault.master_key {
		return MasterKey::from_hex(hex.expose()).context("LOCKBOX_MASTER_KEY is not a valid key");
	}
	let path = &config.vault.master_key_file;
	MasterKey::from_file(path)
		.with_context(|| format!("failed to read master key from {}", path.display()))
}

/// Reuse a key supplied through the environment or an existing key file,
/// otherwise generate one and write it next to the vault.
fn init_master_key(config: &LockboxConfig) -> Result<MasterKey> {
	if config.vault.master_key.is_some() || config.vault.master_key_file.exists() {
		return load_master_key(config);
	}

	let path = &config.vault.master_key_file;
	let key = MasterKey::generate();
	key.write_file(path)
		.with_context(|| format!("failed to write master key to {}", path.display()))?;
	info!(path = %path.display(), "generated master key");
	Ok(key)
}
