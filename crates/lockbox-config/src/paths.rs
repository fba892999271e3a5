// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! XDG Base Directory compliant path resolution.

use std::path::PathBuf;

use crate::ConfigError;

pub const SYSTEM_CONFIG_FILE: &str = "/etc/lockbox/config.toml";

/// Resolved XDG paths for lockbox.
#[derive(Debug, Clone)]
pub struct PathsConfig {
	/// User config file: ~/.config/lockbox/config.toml
	pub user_config_file: PathBuf,
	/// System config file: /etc/lockbox/config.toml
	pub system_config_file: PathBuf,
	/// Data directory: ~/.local/share/lockbox/
	pub data_dir: PathBuf,
}

impl PathsConfig {
	/// Paths rooted under a single directory.
	pub fn under(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		Self {
			user_config_file: root.join("config/lockbox/config.toml"),
			system_config_file: PathBuf::from(SYSTEM_CONFIG_FILE),
			data_dir: root.join("data/lockbox"),
		}
	}

	pub fn default_data_file(&self) -> PathBuf {
		self.data_dir.join("vault.json")
	}
}

/// Resolve XDG paths according to the Base Directory Specification.
///
/// Uses `XDG_CONFIG_HOME` and `XDG_DATA_HOME` when set, otherwise
/// `~/.config` and `~/.local/share`.
pub fn resolve_xdg_paths() -> Result<PathsConfig, ConfigError> {
	let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;

	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".config"));

	let data_home = std::env::var_os("XDG_DATA_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".local/share"));

	tracing::debug!(
		config_home = %config_home.display(),
		data_home = %data_home.display(),
		"resolved XDG paths"
	);

	Ok(PathsConfig {
		user_config_file: config_home.join("lockbox/config.toml"),
		system_config_file: PathBuf::from(SYSTEM_CONFIG_FILE),
		data_dir: data_home.join("lockbox"),
	})
}
