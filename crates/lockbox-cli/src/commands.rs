// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use lockbox_config::LockboxConfig;
use lockbox_core::{
	Identity, IdentityId, IdentityKind, PolicyDocument, PolicyFormat, Privilege, ResourceId,
	SecretValue, VaultError,
};

use crate::vault::Vault;
use crate::{Command, IdentityCommand, PolicyCommand};

pub fn run(config: LockboxConfig, command: Command) -> Result<()> {
	if let Command::Init { admin } = command {
		let (_, api_key) = Vault::init(config, admin)?;
		println!("{}", api_key.expose());
		return Ok(());
	}

	let vault = Vault::open(config)?;
	let identity = vault.login()?;

	match dispatch(&vault, identity, command) {
		Ok(Outcome::Mutated) => vault.save(),
		Ok(Outcome::ReadOnly) => Ok(()),
		Err(e) => {
			if let Some(err) = e.downcast_ref::<VaultError>() {
				if err.is_internal() {
					error!(error = %err, "vault operation failed");
				}
			}
			Err(e)
		}
	}
}

enum Outcome {
	ReadOnly,
	Mutated,
}

fn dispatch(vault: &Vault, identity: Identity, command: Command) -> Result<Outcome> {
	let session = vault.session(identity);

	match command {
		Command::Init { .. } => bail!("vault is already initialized"),

		Command::Whoami => {
			print_json(session.whoami())?;
			Ok(Outcome::ReadOnly)
		}

		Command::Policy {
			command: PolicyCommand::Load {
				branch,
				file,
				dry_run,
			},
		} => {
			let document = read_policy(&file)?;
			if dry_run {
				print_json(&session.dry_run_policy(&branch, &document)?)?;
				return Ok(Outcome::ReadOnly);
			}
			let result = session.apply_policy(&branch, &document)?;
			print_json(&result)?;
			Ok(Outcome::Mutated)
		}

		Command::Get { id, version } => {
			let value = session.get_secret(&id, version)?;
			println!("{}", value.expose());
			Ok(Outcome::ReadOnly)
		}

		Command::Set { id, value } => {
			let value = match value {
				Some(v) => SecretValue::new(v),
				None => read_stdin_value()?,
			};
			let version = session.set_secret(&id, value)?;
			println!("{version}");
			Ok(Outcome::Mutated)
		}

		Command::Rotate { id, value } => {
			let value = value.map(SecretValue::new).unwrap_or_else(SecretValue::unusable);
			let version = session.rotate_secret(&id, value)?;
			info!(resource = %id, version, "secret rotated");
			println!("{version}");
			Ok(Outcome::Mutated)
		}

		Command::Versions { id } => {
			for version in session.secret_versions(&id)? {
				let by = version
					.created_by
					.as_ref()
					.map(|i| i.as_str())
					.unwrap_or("-");
				println!(
					"{}\t{}\t{}",
					version.version,
					version.created_at.to_rfc3339(),
					by
				);
			}
			Ok(Outcome::ReadOnly)
		}

		Command::List { kind } => {
			for resource in session.list_resources(kind) {
				println!("{}\t{}\t{}", resource.kind, resource.id, resource.owner);
			}
			Ok(Outcome::ReadOnly)
		}

		Command::Identity {
			command: IdentityCommand::Add { id, host },
		} => {
			let kind = if host {
				IdentityKind::Host
			} else {
				IdentityKind::User
			};
			session.register_identity(id.clone(), kind)?;
			let api_key = vault.auth().register(&id, kind)?;
			println!("{}", api_key.expose());
			Ok(Outcome::Mutated)
		}

		Command::Identity {
			command: IdentityCommand::RotateKey { id },
		} => {
			authorize_key_rotation(vault, session.whoami(), &id)?;
			let api_key = vault.auth().rotate_key(&id)?;
			println!("{}", api_key.expose());
			Ok(Outcome::Mutated)
		}
	}
}

/// Callers may rotate their own key; anyone else's needs `update` on root.
fn authorize_key_rotation(vault: &Vault, caller: &Identity, id: &IdentityId) -> Result<(), VaultError> {
	let root = ResourceId::root();
	if caller.id == *id || vault.engine().authorized(&caller.id, &root, Privilege::Update) {
		return Ok(());
	}
	Err(VaultError::Unauthorized {
		identity: caller.id.clone(),
		resource: root,
		privilege: Privilege::Update,
	})
}

fn read_policy(path: &Path) -> Result<PolicyDocument> {
	let text = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read policy file {}", path.display()))?;
	Ok(PolicyDocument::parse(&text, PolicyFormat::from_path(path))?)
}

fn read_stdin_value() -> Result<SecretValue> {
	let mut buf = String::new();
	std::io::stdin()
		.read_to_string(&mut buf)
		.context("failed to read secret value from stdin")?;
	let value = buf.strip_suffix('\n').unwrap_or(&buf);
	Ok(SecretValue::new(value))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
