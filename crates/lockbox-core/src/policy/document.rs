// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy document format.
//!
//! A document is a top-level list of statements, each a map tagged by `op`:
//!
//! ```yaml
//! - op: create_variable
//!   id: ec2_instances/instance_access_key
//! - op: create_group
//!   id: operators
//! - op: grant
//!   identity: operators
//!   resource: ec2_instances/instance_access_key
//!   privilege: read
//! ```
//!
//! Statements are decoded one by one so a parse failure points at the
//! offending index. Ids are kept as written; scoping to the target branch
//! happens during validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::types::Privilege;

/// One declarative policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Statement {
	CreateVariable {
		id: String,
	},
	CreateGroup {
		id: String,
	},
	/// Nested policy branch that later documents can be loaded into.
	CreatePolicy {
		id: String,
	},
	Grant {
		identity: String,
		resource: String,
		privilege: Privilege,
	},
	Revoke {
		identity: String,
		resource: String,
		privilege: Privilege,
	},
}

impl Statement {
	pub fn op(&self) -> &'static str {
		match self {
			Statement::CreateVariable { .. } => "create_variable",
			Statement::CreateGroup { .. } => "create_group",
			Statement::CreatePolicy { .. } => "create_policy",
			Statement::Grant { .. } => "grant",
			Statement::Revoke { .. } => "revoke",
		}
	}
}

/// Serialization format of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
	Json,
	Yaml,
}

impl PolicyFormat {
	/// `.json` files are JSON; anything else is read as YAML, which also
	/// accepts JSON input.
	pub fn from_path(path: &Path) -> Self {
		match path.extension().and_then(|e| e.to_str()) {
			Some(ext) if ext.eq_ignore_ascii_case("json") => PolicyFormat::Json,
			_ => PolicyFormat::Yaml,
		}
	}
}

/// An ordered, parsed policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
	statements: Vec<Statement>,
}

impl PolicyDocument {
	pub fn new(statements: Vec<Statement>) -> Self {
		Self { statements }
	}

	pub fn parse(text: &str, format: PolicyFormat) -> Result<Self, PolicyError> {
		match format {
			PolicyFormat::Json => Self::parse_json(text),
			PolicyFormat::Yaml => Self::parse_yaml(text),
		}
	}

	fn parse_json(text: &str) -> Result<Self, PolicyError> {
		let value: serde_json::Value =
			serde_json::from_str(text).map_err(|e| PolicyError::parse(None, e.to_string()))?;
		let serde_json::Value::Array(items) = value else {
			return Err(PolicyError::parse(None, "document must be a list of statements"));
		};

		let statements = items
			.into_iter()
			.enumerate()
			.map(|(index, item)| {
				serde_json::from_value(item).map_err(|e| PolicyError::parse(Some(index), e.to_string()))
			})
			.collect::<Result<_, _>>()?;
		Ok(Self { statements })
	}

	fn parse_yaml(text: &str) -> Result<Self, PolicyError> {
		let value: serde_yaml::Value =
			serde_yaml::from_str(text).map_err(|e| PolicyError::parse(None, e.to_string()))?;
		let items = match value {
			serde_yaml::Value::Sequence(items) => items,
			serde_yaml::Value::Null => Vec::new(),
			_ => return Err(PolicyError::parse(None, "document must be a list of statements")),
		};

		let statements = items
			.into_iter()
			.enumerate()
			.map(|(index, item)| {
				serde_yaml::from_value(item).map_err(|e| PolicyError::parse(Some(index), e.to_string()))
			})
			.collect::<Result<_, _>>()?;
		Ok(Self { statements })
	}

	pub fn statements(&self) -> &[Statement] {
		&self.statements
	}

	pub fn len(&self) -> usize {
		self.statements.len()
	}

	pub fn is_empty(&self) -> bool {
		self.statements.is_empty()
	}
}

impl FromIterator<Statement> for PolicyDocument {
	fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
		Self::new(iter.into_iter().collect())
	}
}
