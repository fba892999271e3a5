// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration validation.

use crate::runtime::{LockboxConfig, LogFormat, LogLevel};
use crate::ConfigError;

/// Validate the complete configuration.
pub fn validate_config(config: &LockboxConfig) -> Result<(), ConfigError> {
	validate_account(&config.vault.account)?;
	if let Some(login) = &config.auth.login {
		validate_login(login)?;
	}
	if config.vault.data_file.as_os_str().is_empty() {
		return Err(ConfigError::invalid_value(
			"vault.data_file",
			"must not be empty",
		));
	}
	Ok(())
}

pub fn validate_account(account: &str) -> Result<(), ConfigError> {
	if account.trim().is_empty() {
		return Err(ConfigError::invalid_value(
			"vault.account",
			"must not be empty",
		));
	}
	if account.chars().any(|c| c.is_whitespace() || c == '/') {
		return Err(ConfigError::invalid_value(
			"vault.account",
			format!("'{account}' must not contain whitespace or '/'"),
		));
	}
	Ok(())
}

pub fn validate_login(login: &str) -> Result<(), ConfigError> {
	if login.trim().is_empty() {
		return Err(ConfigError::invalid_value("auth.login", "must not be empty"));
	}
	Ok(())
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, ConfigError> {
	match s.to_ascii_lowercase().as_str() {
		"error" => Ok(LogLevel::Error),
		"warn" => Ok(LogLevel::Warn),
		"info" => Ok(LogLevel::Info),
		"debug" => Ok(LogLevel::Debug),
		"trace" => Ok(LogLevel::Trace),
		_ => Err(ConfigError::invalid_value(
			"logging.level",
			format!("unknown level '{s}', expected one of: trace, debug, info, warn, error"),
		)),
	}
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, ConfigError> {
	match s.to_ascii_lowercase().as_str() {
		"pretty" => Ok(LogFormat::Pretty),
		"compact" => Ok(LogFormat::Compact),
		"json" => Ok(LogFormat::Json),
		_ => Err(ConfigError::invalid_value(
			"logging.format",
			format!("unknown format '{s}', expected one of: pretty, compact, json"),
		)),
	}
}
