// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Final runtime configuration with defaults applied.

use std::fmt;
use std::path::PathBuf;

use lockbox_core::SecretValue;

use crate::layer::{AuthLayer, ConfigLayer, LoggingLayer, VaultLayer};
use crate::paths::PathsConfig;
use crate::validation::{parse_log_format, parse_log_level};
use crate::ConfigError;

pub const DEFAULT_ACCOUNT: &str = "default";
pub const MASTER_KEY_FILE_NAME: &str = "master.key";

/// Fully resolved lockbox configuration.
#[derive(Debug, Clone)]
pub struct LockboxConfig {
	pub vault: VaultConfig,
	pub auth: AuthConfig,
	pub logging: LoggingConfig,
	pub paths: PathsConfig,
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
	pub account: String,
	pub data_file: PathBuf,
	pub master_key_file: PathBuf,
	/// Hex master key from the environment; wins over `master_key_file`.
	pub master_key: Option<SecretValue>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
	pub login: Option<String>,
	pub api_key: Option<SecretValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoggingConfig {
	pub level: LogLevel,
	pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
	Error,
	Warn,
	#[default]
	Info,
	Debug,
	Trace,
}

impl LogLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Error => "error",
			LogLevel::Warn => "warn",
			LogLevel::Info => "info",
			LogLevel::Debug => "debug",
			LogLevel::Trace => "trace",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
	#[default]
	Pretty,
	Compact,
	Json,
}

impl LockboxConfig {
	/// Build runtime config from a merged layer, applying defaults.
	pub fn from_layer(layer: ConfigLayer, paths: PathsConfig) -> Result<Self, ConfigError> {
		let vault = build_vault_config(layer.vault.unwrap_or_default(), &paths);
		let auth = build_auth_config(layer.auth.unwrap_or_default());
		let logging = build_logging_config(layer.logging.unwrap_or_default())?;

		Ok(Self {
			vault,
			auth,
			logging,
			paths,
		})
	}
}

fn build_vault_config(layer: VaultLayer, paths: &PathsConfig) -> VaultConfig {
	let data_file = layer
		.data_file
		.unwrap_or_else(|| paths.default_data_file());
	let master_key_file = layer.master_key_file.unwrap_or_else(|| {
		data_file
			.parent()
			.map(|dir| dir.join(MASTER_KEY_FILE_NAME))
			.unwrap_or_else(|| PathBuf::from(MASTER_KEY_FILE_NAME))
	});

	VaultConfig {
		account: layer
			.account
			.unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
		data_file,
		master_key_file,
		master_key: layer.master_key,
	}
}

fn build_auth_config(layer: AuthLayer) -> AuthConfig {
	AuthConfig {
		login: layer.login,
		api_key: layer.api_key,
	}
}

fn build_logging_config(layer: LoggingLayer) -> Result<LoggingConfig, ConfigError> {
	Ok(LoggingConfig {
		level: layer
			.level
			.as_deref()
			.map(parse_log_level)
			.transpose()?
			.unwrap_or_default(),
		format: layer
			.format
			.as_deref()
			.map(parse_log_format)
			.transpose()?
			.unwrap_or_default(),
	})
}
