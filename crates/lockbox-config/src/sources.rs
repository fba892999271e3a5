// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: files, environment, CLI, defaults.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::env::load_secret_env;
use crate::layer::*;
use crate::paths::PathsConfig;
use crate::ConfigError;

pub const API_KEY_ENV: &str = "LOCKBOX_API_KEY";
pub const MASTER_KEY_ENV: &str = "LOCKBOX_MASTER_KEY";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	SystemFile = 20,
	UserFile = 30,
	CustomFile = 40,
	Environment = 50,
	Cli = 60,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	/// Name for logging
	fn name(&self) -> &'static str;

	/// Precedence level
	fn precedence(&self) -> Precedence;

	/// Load configuration layer from this source
	fn load(&self) -> Result<ConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading defaults");
		// Defaults are applied when the runtime config is built.
		Ok(ConfigLayer::default())
	}
}

/// File-based configuration source (TOML).
pub struct FileSource {
	path: PathBuf,
	precedence: Precedence,
	name: &'static str,
	required: bool,
}

impl FileSource {
	/// System config: /etc/lockbox/config.toml
	pub fn system(paths: &PathsConfig) -> Self {
		Self {
			path: paths.system_config_file.clone(),
			precedence: Precedence::SystemFile,
			name: "system-config",
			required: false,
		}
	}

	/// User config: ~/.config/lockbox/config.toml
	pub fn user(paths: &PathsConfig) -> Self {
		Self {
			path: paths.user_config_file.clone(),
			precedence: Precedence::UserFile,
			name: "user-config",
			required: false,
		}
	}

	/// File named with `--config`; it must exist.
	pub fn custom(path: PathBuf) -> Self {
		Self {
			path,
			precedence: Precedence::CustomFile,
			name: "custom-config",
			required: true,
		}
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		self.name
	}
	fn precedence(&self) -> Precedence {
		self.precedence
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		if !self.path.exists() {
			if self.required {
				return Err(ConfigError::FileNotFound(self.path.clone()));
			}
			debug!(path = %self.path.display(), source = self.name, "config file not found, skipping");
			return Ok(ConfigLayer::default());
		}

		debug!(path = %self.path.display(), source = self.name, "loading config file");

		let content = std::fs::read_to_string(&self.path)?;
		let layer: ConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!(source = self.name, "parsed config layer");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Plain settings come from `LOCKBOX_*` variables. The API key and master key
/// come from `LOCKBOX_API_KEY[_FILE]` and `LOCKBOX_MASTER_KEY[_FILE]`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading environment variables");
		let mut layer = layer_from_vars(std::env::vars());

		if let Some(secret) = load_secret_env(API_KEY_ENV)? {
			trace!("loaded API key from environment");
			layer.auth.get_or_insert_with(AuthLayer::default).api_key = Some(secret);
		}

		if let Some(secret) = load_secret_env(MASTER_KEY_ENV)? {
			trace!("loaded master key from environment");
			layer.vault.get_or_insert_with(VaultLayer::default).master_key = Some(secret);
		}

		Ok(layer)
	}
}

pub(crate) fn layer_from_vars(vars: impl IntoIterator<Item = (String, String)>) -> ConfigLayer {
	let mut layer = ConfigLayer::default();

	for (key, value) in vars {
		if !key.starts_with("LOCKBOX_") {
			continue;
		}

		let value = value.trim().to_string();
		if value.is_empty() {
			continue;
		}

		trace!(key = %key, "processing env var");

		match key.as_str() {
			"LOCKBOX_ACCOUNT" => {
				layer.vault.get_or_insert_with(VaultLayer::default).account = Some(value);
			}
			"LOCKBOX_DATA_FILE" => {
				layer.vault.get_or_insert_with(VaultLayer::default).data_file =
					Some(PathBuf::from(value));
			}
			"LOCKBOX_MASTER_KEY_FILE" => {
				layer
					.vault
					.get_or_insert_with(VaultLayer::default)
					.master_key_file = Some(PathBuf::from(value));
			}
			"LOCKBOX_LOGIN" => {
				layer.auth.get_or_insert_with(AuthLayer::default).login = Some(value);
			}
			"LOCKBOX_LOG_LEVEL" => {
				layer.logging.get_or_insert_with(LoggingLayer::default).level = Some(value);
			}
			"LOCKBOX_LOG_FORMAT" => {
				layer.logging.get_or_insert_with(LoggingLayer::default).format = Some(value);
			}
			_ => {
				// Unknown LOCKBOX_ variable, ignore
			}
		}
	}

	layer
}

/// CLI argument overrides.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub config_file: Option<PathBuf>,
	pub account: Option<String>,
	pub data_file: Option<PathBuf>,
	pub login: Option<String>,
	pub log_level: Option<String>,
	pub log_format: Option<String>,
}

/// CLI argument source.
pub struct CliSource {
	overrides: CliOverrides,
}

impl CliSource {
	pub fn new(overrides: CliOverrides) -> Self {
		Self { overrides }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading CLI overrides");
		let overrides = self.overrides.clone();
		let mut layer = ConfigLayer::default();

		if overrides.account.is_some() || overrides.data_file.is_some() {
			layer.vault = Some(VaultLayer {
				account: overrides.account,
				data_file: overrides.data_file,
				..Default::default()
			});
		}

		if overrides.login.is_some() {
			layer.auth = Some(AuthLayer {
				login: overrides.login,
				api_key: None,
			});
		}

		if overrides.log_level.is_some() || overrides.log_format.is_some() {
			layer.logging = Some(LoggingLayer {
				level: overrides.log_level,
				format: overrides.log_format,
			});
		}

		Ok(layer)
	}
}
