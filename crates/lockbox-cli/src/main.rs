// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! lockbox - secrets vault command-line interface.
//!
//! Every command loads the sealed vault file, authenticates the configured
//! login, makes one engine call and writes the vault back only if that call
//! changed something. The vault's `.lock` sidecar is held for that whole
//! cycle, so concurrent commands against one vault run one after the other.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lockbox_config::{load_config, CliOverrides, LogFormat, LoggingConfig};
use lockbox_core::{IdentityId, ResourceId, ResourceKind};

mod commands;
mod vault;

/// lockbox - a secrets vault with policy-driven access control
#[derive(Parser, Debug)]
#[command(name = "lockbox", version, about, long_about = None)]
struct Args {
	/// Path to custom configuration file
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	/// Identity to authenticate as (API key comes from LOCKBOX_API_KEY)
	#[arg(long, global = true)]
	login: Option<String>,

	/// Vault account name
	#[arg(long, global = true)]
	account: Option<String>,

	/// Vault data file
	#[arg(long, global = true)]
	data_file: Option<PathBuf>,

	/// Log level (overrides config)
	#[arg(short, long, global = true)]
	log_level: Option<String>,

	/// Log format: pretty, compact or json (overrides config)
	#[arg(long, global = true)]
	log_format: Option<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Create a new vault and print the admin API key
	Init {
		/// Identity that will own the root policy
		#[arg(long)]
		admin: IdentityId,
	},
	/// Show the authenticated identity
	Whoami,
	/// Load policy documents
	Policy {
		#[command(subcommand)]
		command: PolicyCommand,
	},
	/// Print a secret value
	Get {
		id: ResourceId,
		/// Version to read (latest if omitted)
		#[arg(long)]
		version: Option<u32>,
	},
	/// Store a new secret version
	Set {
		id: ResourceId,
		/// Value to store; read from stdin if omitted
		value: Option<String>,
	},
	/// Replace a secret with a new value, random if none is given
	Rotate {
		id: ResourceId,
		#[arg(long)]
		value: Option<String>,
	},
	/// List the versions of a secret
	Versions { id: ResourceId },
	/// List resources visible to the caller
	List {
		/// Only show resources of this kind
		#[arg(long)]
		kind: Option<ResourceKind>,
	},
	/// Manage identities
	Identity {
		#[command(subcommand)]
		command: IdentityCommand,
	},
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
	/// Apply a policy file (YAML, or JSON by extension) under a branch
	Load {
		branch: ResourceId,
		file: PathBuf,
		/// Validate and report without changing anything
		#[arg(long)]
		dry_run: bool,
	},
}

#[derive(Subcommand, Debug)]
enum IdentityCommand {
	/// Register an identity and print its API key
	Add {
		id: IdentityId,
		/// Register a host instead of a user
		#[arg(long)]
		host: bool,
	},
	/// Issue a new API key, invalidating the old one
	RotateKey { id: IdentityId },
}

impl From<&Args> for CliOverrides {
	fn from(args: &Args) -> Self {
		CliOverrides {
			config_file: args.config.clone(),
			account: args.account.clone(),
			data_file: args.data_file.clone(),
			login: args.login.clone(),
			log_level: args.log_level.clone(),
			log_format: args.log_format.clone(),
		}
	}
}

fn init_tracing(logging: &LoggingConfig) {
	let level = logging.level.as_str();
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(format!(
			"lockbox_cli={level},lockbox_core={level},lockbox_config={level}"
		))
	});

	// stdout carries command output only.
	match logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Compact => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().compact().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(std::io::stderr))
				.init();
		}
	}
}

fn main() -> Result<()> {
	let args = Args::parse();

	let config = load_config(CliOverrides::from(&args)).context("failed to load configuration")?;
	init_tracing(&config.logging);

	info!(
		account = %config.vault.account,
		data_file = %config.vault.data_file.display(),
		"starting lockbox"
	);

	commands::run(config, args.command)
}
