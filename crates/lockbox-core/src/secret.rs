// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redacting wrapper for secret variable contents.
//!
//! A [`SecretValue`] never shows up in `Debug`, `Display`, or serialized output,
//! and its memory is zeroed on drop. Reading the value requires an explicit
//! [`SecretValue::expose`] call so every access is visible in review.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Placeholder printed in place of any secret value.
pub const REDACTED: &str = "[REDACTED]";

/// Largest value accepted by the engine (64 KiB).
pub const MAX_SECRET_VALUE_SIZE: usize = 64 * 1024;

/// Contents of one secret version.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SecretValue {
	inner: String,
}

impl SecretValue {
	pub fn new(value: impl Into<String>) -> Self {
		Self {
			inner: value.into(),
		}
	}

	/// Explicitly access the plaintext.
	pub fn expose(&self) -> &str {
		&self.inner
	}

	/// Size of the plaintext in bytes.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Generate a random value that no consumer can have configured.
	///
	/// Used to invalidate a secret through rotation, since the store has no
	/// delete primitive.
	pub fn unusable() -> Self {
		use rand::RngCore;
		let mut bytes = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut bytes);
		let value = format!("revoked-{}", hex::encode(bytes));
		bytes.zeroize();
		Self::new(value)
	}
}

impl Clone for SecretValue {
	fn clone(&self) -> Self {
		Self::new(self.inner.clone())
	}
}

impl PartialEq for SecretValue {
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl Eq for SecretValue {}

impl fmt::Debug for SecretValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SecretValue").field(&REDACTED).finish()
	}
}

impl fmt::Display for SecretValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl From<String> for SecretValue {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretValue {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl Serialize for SecretValue {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(REDACTED)
	}
}

impl<'de> Deserialize<'de> for SecretValue {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer).map(SecretValue::new)
	}
}
