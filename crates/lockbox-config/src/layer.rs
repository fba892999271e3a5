// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration layer for merging from multiple sources.

use std::path::PathBuf;

use lockbox_core::SecretValue;
use serde::Deserialize;

/// Partial configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
	#[serde(default)]
	pub vault: Option<VaultLayer>,
	#[serde(default)]
	pub auth: Option<AuthLayer>,
	#[serde(default)]
	pub logging: Option<LoggingLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultLayer {
	#[serde(default)]
	pub account: Option<String>,
	#[serde(default)]
	pub data_file: Option<PathBuf>,
	#[serde(default)]
	pub master_key_file: Option<PathBuf>,
	/// Only ever set from the environment.
	#[serde(skip)]
	pub master_key: Option<SecretValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthLayer {
	#[serde(default)]
	pub login: Option<String>,
	/// Only ever set from the environment.
	#[serde(skip)]
	pub api_key: Option<SecretValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingLayer {
	#[serde(default)]
	pub level: Option<String>,
	#[serde(default)]
	pub format: Option<String>,
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

fn overwrite<T>(target: &mut Option<T>, source: Option<T>) {
	if source.is_some() {
		*target = source;
	}
}

impl ConfigLayer {
	/// Merge another layer into this one (other takes precedence).
	pub fn merge(&mut self, other: ConfigLayer) {
		merge_option(&mut self.vault, other.vault, |t, s| {
			overwrite(&mut t.account, s.account);
			overwrite(&mut t.data_file, s.data_file);
			overwrite(&mut t.master_key_file, s.master_key_file);
			overwrite(&mut t.master_key, s.master_key);
		});

		merge_option(&mut self.auth, other.auth, |t, s| {
			overwrite(&mut t.login, s.login);
			overwrite(&mut t.api_key, s.api_key);
		});

		merge_option(&mut self.logging, other.logging, |t, s| {
			overwrite(&mut t.level, s.level);
			overwrite(&mut t.format, s.format);
		});
	}
}
