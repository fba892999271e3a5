// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration registry - manages sources and merges layers.

use tracing::{debug, info};

use crate::layer::ConfigLayer;
use crate::paths::PathsConfig;
use crate::runtime::LockboxConfig;
use crate::sources::ConfigSource;
use crate::validation::validate_config;
use crate::ConfigError;

/// Registry that manages configuration sources and merges them.
pub struct ConfigRegistry {
	sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigRegistry {
	/// Create a new empty registry.
	pub fn new() -> Self {
		Self {
			sources: Vec::new(),
		}
	}

	/// Register a configuration source.
	pub fn register(&mut self, source: Box<dyn ConfigSource>) {
		debug!(source = source.name(), precedence = ?source.precedence(), "registering config source");
		self.sources.push(source);
	}

	/// Load configuration from all sources, merge, and validate.
	///
	/// Sources are merged lowest precedence first. A source that fails to
	/// load fails the whole load: a vault must not fall back to a different
	/// data file because its config was unreadable.
	pub fn load(&self, paths: PathsConfig) -> Result<LockboxConfig, ConfigError> {
		let mut sorted_sources: Vec<_> = self.sources.iter().collect();
		sorted_sources.sort_by_key(|s| s.precedence());

		info!(
			source_count = sorted_sources.len(),
			"loading configuration from sources"
		);

		let mut merged = ConfigLayer::default();
		for source in &sorted_sources {
			let layer = source.load()?;
			debug!(source = source.name(), "merging config layer");
			merged.merge(layer);
		}

		let config = LockboxConfig::from_layer(merged, paths)?;
		validate_config(&config)?;

		info!(
			account = %config.vault.account,
			data_file = %config.vault.data_file.display(),
			log_level = %config.logging.level,
			"configuration loaded successfully"
		);

		Ok(config)
	}

	/// Get the number of registered sources.
	pub fn source_count(&self) -> usize {
		self.sources.len()
	}
}

impl Default for ConfigRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sources::{CliOverrides, CliSource, DefaultsSource, FileSource};
	use std::io::Write;
	use tempfile::{NamedTempFile, TempDir};

	#[test]
	fn test_registry_registers_sources() {
		let mut registry = ConfigRegistry::new();
		assert_eq!(registry.source_count(), 0);

		registry.register(Box::new(DefaultsSource));
		assert_eq!(registry.source_count(), 1);
	}

	#[test]
	fn test_registry_loads_with_defaults() {
		let dir = TempDir::new().unwrap();
		let mut registry = ConfigRegistry::new();
		registry.register(Box::new(DefaultsSource));

		let config = registry.load(PathsConfig::under(dir.path())).unwrap();
		assert_eq!(config.vault.account, "default");
	}

	#[test]
	fn test_cli_beats_file_regardless_of_registration_order() {
		let dir = TempDir::new().unwrap();
		let mut file = NamedTempFile::new().unwrap();
		writeln!(file, "[vault]\naccount = \"from-file\"\n[auth]\nlogin = \"file-user\"").unwrap();

		let mut registry = ConfigRegistry::new();
		registry.register(Box::new(CliSource::new(CliOverrides {
			account: Some("from-cli".into()),
			..Default::default()
		})));
		registry.register(Box::new(FileSource::custom(file.path().to_path_buf())));
		registry.register(Box::new(DefaultsSource));

		let config = registry.load(PathsConfig::under(dir.path())).unwrap();
		assert_eq!(config.vault.account, "from-cli");
		assert_eq!(config.auth.login.as_deref(), Some("file-user"));
	}

	#[test]
	fn test_invalid_file_fails_the_load() {
		let dir = TempDir::new().unwrap();
		let mut file = NamedTempFile::new().unwrap();
		writeln!(file, "[vault]\naccount = \"\"").unwrap();

		let mut registry = ConfigRegistry::new();
		registry.register(Box::new(FileSource::custom(file.path().to_path_buf())));

		let err = registry.load(PathsConfig::under(dir.path())).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { .. }));
	}
}
