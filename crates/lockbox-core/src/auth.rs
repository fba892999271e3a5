// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! API-key authentication.
//!
//! Each registered identity holds one API key. Keys are `lbx_` followed by 64
//! hex characters and are stored only as Argon2id hashes; the plaintext is
//! returned once, at registration or rotation.

use std::collections::HashMap;

use argon2::password_hash::{
	rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
#[cfg(test)]
use argon2::{Algorithm, Params, Version};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::AuthError;
use crate::secret::SecretValue;
use crate::types::{Identity, IdentityId, IdentityKind};

/// Prefix for all lockbox API keys.
pub const API_KEY_PREFIX: &str = "lbx_";

/// Number of random bytes in an API key (produces 64 hex chars).
pub const API_KEY_BYTES: usize = 32;

/// Login material presented by a caller.
#[derive(Debug, Clone)]
pub struct Credentials {
	pub login: IdentityId,
	pub api_key: SecretValue,
}

impl Credentials {
	pub fn new(login: IdentityId, api_key: impl Into<SecretValue>) -> Self {
		Self {
			login,
			api_key: api_key.into(),
		}
	}
}

/// Turns credentials into an authenticated [`Identity`].
pub trait Authenticator: Send + Sync {
	fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}

/// Stored credential for one identity. Never holds the plaintext key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
	pub identity: IdentityId,
	pub kind: IdentityKind,
	/// Argon2 PHC string.
	pub key_hash: String,
	pub issued_at: DateTime<Utc>,
}

/// Argon2 instance: strong defaults in normal builds, cheap parameters under
/// `cfg(test)` so the suite stays fast.
#[inline]
fn argon2_instance() -> Argon2<'static> {
	#[cfg(test)]
	{
		let params = Params::new(1024, 1, 1, None).expect("valid Argon2 params for tests");
		Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
	}

	#[cfg(not(test))]
	{
		Argon2::default()
	}
}

/// Generate a fresh API key. Returns (plaintext, argon2 hash).
pub fn generate_api_key() -> Result<(SecretValue, String), AuthError> {
	use rand::Rng;
	let bytes: [u8; API_KEY_BYTES] = rand::thread_rng().gen();
	let key = SecretValue::new(format!("{API_KEY_PREFIX}{}", hex::encode(bytes)));
	let hash = hash_api_key(key.expose())?;
	Ok((key, hash))
}

pub fn hash_api_key(key: &str) -> Result<String, AuthError> {
	let salt = SaltString::generate(&mut OsRng);
	argon2_instance()
		.hash_password(key.as_bytes(), &salt)
		.map(|hash| hash.to_string())
		.map_err(|e| AuthError::Hashing(e.to_string()))
}

pub fn verify_api_key(key: &str, hash: &str) -> bool {
	let Ok(parsed) = PasswordHash::new(hash) else {
		return false;
	};
	argon2_instance()
		.verify_password(key.as_bytes(), &parsed)
		.is_ok()
}

pub fn is_valid_api_key_format(key: &str) -> bool {
	key.strip_prefix(API_KEY_PREFIX).is_some_and(|hex_part| {
		hex_part.len() == API_KEY_BYTES * 2 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
	})
}

/// Authenticator backed by an in-memory table of key hashes.
#[derive(Debug)]
pub struct ApiKeyAuthenticator {
	account: String,
	records: RwLock<HashMap<IdentityId, CredentialRecord>>,
}

impl ApiKeyAuthenticator {
	pub fn new(account: impl Into<String>) -> Self {
		Self::from_records(account, Vec::new())
	}

	/// Rebuild from persisted records.
	pub fn from_records(account: impl Into<String>, records: Vec<CredentialRecord>) -> Self {
		let records = records
			.into_iter()
			.map(|r| (r.identity.clone(), r))
			.collect();
		Self {
			account: account.into(),
			records: RwLock::new(records),
		}
	}

	/// All records, sorted by identity.
	pub fn records(&self) -> Vec<CredentialRecord> {
		let mut records: Vec<CredentialRecord> = self.records.read().values().cloned().collect();
		records.sort_by(|a, b| a.identity.cmp(&b.identity));
		records
	}

	pub fn is_registered(&self, id: &IdentityId) -> bool {
		self.records.read().contains_key(id)
	}

	/// Issue the first API key for an identity.
	#[instrument(skip_all, fields(identity = %id, kind = %kind))]
	pub fn register(&self, id: &IdentityId, kind: IdentityKind) -> Result<SecretValue, AuthError> {
		if self.is_registered(id) {
			return Err(AuthError::AlreadyRegistered(id.clone()));
		}
		let (key, key_hash) = generate_api_key()?;

		let mut records = self.records.write();
		if records.contains_key(id) {
			return Err(AuthError::AlreadyRegistered(id.clone()));
		}
		records.insert(
			id.clone(),
			CredentialRecord {
				identity: id.clone(),
				kind,
				key_hash,
				issued_at: Utc::now(),
			},
		);
		info!("API key issued");
		Ok(key)
	}

	/// Replace an identity's API key. The old key stops working immediately.
	#[instrument(skip_all, fields(identity = %id))]
	pub fn rotate_key(&self, id: &IdentityId) -> Result<SecretValue, AuthError> {
		if !self.is_registered(id) {
			return Err(AuthError::UnknownIdentity(id.clone()));
		}
		let (key, key_hash) = generate_api_key()?;

		let mut records = self.records.write();
		let record = records
			.get_mut(id)
			.ok_or_else(|| AuthError::UnknownIdentity(id.clone()))?;
		record.key_hash = key_hash;
		record.issued_at = Utc::now();
		info!("API key rotated");
		Ok(key)
	}
}

impl Authenticator for ApiKeyAuthenticator {
	#[instrument(skip_all, fields(login = %credentials.login))]
	fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
		let key = credentials.api_key.expose();
		if !is_valid_api_key_format(key) {
			warn!("rejected malformed API key");
			return Err(AuthError::InvalidCredentials);
		}

		// Copy out so the slow hash check runs without holding the lock.
		let record = self.records.read().get(&credentials.login).cloned();
		let Some(record) = record else {
			warn!("authentication failed");
			return Err(AuthError::InvalidCredentials);
		};

		if !verify_api_key(key, &record.key_hash) {
			warn!("authentication failed");
			return Err(AuthError::InvalidCredentials);
		}

		debug!(kind = %record.kind, "authenticated");
		Ok(Identity::new(record.identity, record.kind, self.account.clone()))
	}
}
