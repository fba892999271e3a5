// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end behaviour of the secrets engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use lockbox_core::{
	Identity, IdentityId, IdentityKind, MemorySecretStore, PolicyDocument, PolicyError,
	PolicyFormat, Privilege, ResourceId, SecretStore, SecretValue, SecretVersion, SecretsEngine,
	StoreError, VaultError, VersionInfo,
};

fn rid(s: &str) -> ResourceId {
	ResourceId::new(s).unwrap()
}

fn iid(s: &str) -> IdentityId {
	IdentityId::new(s).unwrap()
}

fn user(id: &str) -> Identity {
	Identity::new(iid(id), IdentityKind::User, "demo")
}

fn json(text: &str) -> PolicyDocument {
	PolicyDocument::parse(text, PolicyFormat::Json).unwrap()
}

fn vault<S: SecretStore>(store: S) -> SecretsEngine<S> {
	let engine = SecretsEngine::bootstrap("demo".into(), iid("admin"), Arc::new(store));
	let admin = engine.session(user("admin"));
	admin.register_identity(iid("bob"), IdentityKind::User).unwrap();
	engine
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn variable_is_readable_after_first_set() {
	let engine = vault(MemorySecretStore::new());
	let admin = engine.session(user("admin"));
	let bob = engine.session(user("bob"));

	let document = json(
		r#"[
			{"op": "create_variable", "id": "a/b/c"},
			{"op": "grant", "identity": "bob", "resource": "a/b/c", "privilege": "read"}
		]"#,
	);
	let result = admin.apply_policy(&ResourceId::root(), &document).unwrap();
	assert_eq!(result.resources_created, 1);
	assert_eq!(result.grants_added, 1);

	let err = bob.get_secret(&rid("a/b/c"), None).unwrap_err();
	assert!(
		matches!(err, VaultError::Store(StoreError::NotFound(_))),
		"empty slot should read as not found, got {err:?}"
	);

	admin.set_secret(&rid("a/b/c"), "x".into()).unwrap();
	assert_eq!(bob.get_secret(&rid("a/b/c"), None).unwrap().expose(), "x");
}

#[test]
fn whoami_returns_caller() {
	let engine = vault(MemorySecretStore::new());
	let bob = engine.session(user("bob"));
	assert_eq!(bob.whoami().id, iid("bob"));
	assert_eq!(bob.whoami().account, "demo");
}

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn every_version_stays_retrievable() {
	let engine = vault(MemorySecretStore::new());
	let admin = engine.session(user("admin"));
	admin
		.apply_policy(&ResourceId::root(), &json(r#"[{"op": "create_variable", "id": "k"}]"#))
		.unwrap();

	let values: Vec<String> = (1..=10).map(|n| format!("value-{n}")).collect();
	for (index, value) in values.iter().enumerate() {
		let version = admin.set_secret(&rid("k"), value.as_str().into()).unwrap();
		assert_eq!(version as usize, index + 1);
	}

	assert_eq!(admin.get_secret(&rid("k"), None).unwrap().expose(), "value-10");
	for (index, value) in values.iter().enumerate() {
		let got = admin.get_secret(&rid("k"), Some(index as u32 + 1)).unwrap();
		assert_eq!(got.expose(), value);
	}
}

// ============================================================================
// Atomicity
// ============================================================================

#[test]
fn malformed_third_statement_changes_nothing() {
	let engine = vault(MemorySecretStore::new());
	let admin = engine.session(user("admin"));

	let text = r#"[
		{"op": "create_variable", "id": "first"},
		{"op": "grant", "identity": "bob", "resource": "first", "privilege": "read"},
		{"op": "grant", "identity": "bob", "resource": "first", "privilege": "superuser"}
	]"#;
	let err = PolicyDocument::parse(text, PolicyFormat::Json).unwrap_err();
	assert!(matches!(err, PolicyError::Parse { statement: Some(2), .. }));

	// A third statement that parses but dangles fails validation instead.
	let dangling = json(
		r#"[
			{"op": "create_variable", "id": "first"},
			{"op": "grant", "identity": "bob", "resource": "first", "privilege": "read"},
			{"op": "grant", "identity": "bob", "resource": "second", "privilege": "read"}
		]"#,
	);
	let err = admin.apply_policy(&ResourceId::root(), &dangling).unwrap_err();
	assert!(matches!(
		err,
		VaultError::Policy(PolicyError::Validation { statement: 2, .. })
	));

	assert!(!engine.resource_exists(&rid("first")));
	assert!(!engine.authorized(&iid("bob"), &rid("first"), Privilege::Read));
	assert!(!engine.store().contains(&rid("first")));
}

/// Store that starts failing `create` after a fixed number of calls.
struct FlakyStore {
	inner: MemorySecretStore,
	creates_left: AtomicUsize,
}

impl FlakyStore {
	fn failing_after(creates: usize) -> Self {
		Self {
			inner: MemorySecretStore::new(),
			creates_left: AtomicUsize::new(creates),
		}
	}
}

impl SecretStore for FlakyStore {
	fn create(&self, id: &ResourceId) -> Result<(), StoreError> {
		let left = self.creates_left.load(Ordering::SeqCst);
		if left == 0 {
			return Err(StoreError::Storage("disk full".into()));
		}
		self.creates_left.store(left - 1, Ordering::SeqCst);
		self.inner.create(id)
	}

	fn set(
		&self,
		id: &ResourceId,
		value: SecretValue,
		created_by: Option<&IdentityId>,
	) -> Result<u32, StoreError> {
		self.inner.set(id, value, created_by)
	}

	fn get(&self, id: &ResourceId, version: Option<u32>) -> Result<SecretVersion, StoreError> {
		self.inner.get(id, version)
	}

	fn list(&self) -> Vec<ResourceId> {
		self.inner.list()
	}

	fn versions(&self, id: &ResourceId) -> Result<Vec<VersionInfo>, StoreError> {
		self.inner.versions(id)
	}

	fn history(&self, id: &ResourceId) -> Result<Vec<SecretVersion>, StoreError> {
		self.inner.history(id)
	}

	fn restore(&self, id: &ResourceId, versions: Vec<SecretVersion>) -> Result<(), StoreError> {
		self.inner.restore(id, versions)
	}

	fn contains(&self, id: &ResourceId) -> bool {
		self.inner.contains(id)
	}

	fn discard_empty(&self, id: &ResourceId) -> Result<bool, StoreError> {
		self.inner.discard_empty(id)
	}
}

#[test]
fn groups_and_identities_share_one_namespace() {
	let engine = vault(MemorySecretStore::new());
	let admin = engine.session(user("admin"));
	admin.register_identity(iid("ops"), IdentityKind::User).unwrap();

	let document = json(
		r#"[
			{"op": "create_variable", "id": "db/pw"},
			{"op": "create_group", "id": "ops"},
			{"op": "grant", "identity": "ops", "resource": "db/pw", "privilege": "read"}
		]"#,
	);
	let err = admin.apply_policy(&ResourceId::root(), &document).unwrap_err();
	assert!(matches!(
		err,
		VaultError::Policy(PolicyError::Validation { statement: 1, .. })
	));
	assert!(!engine.resource_exists(&rid("db/pw")));
	assert!(!engine.authorized(&iid("ops"), &rid("db/pw"), Privilege::Read));

	admin
		.apply_policy(
			&ResourceId::root(),
			&json(r#"[{"op": "create_group", "id": "team"}]"#),
		)
		.unwrap();
	let err = admin
		.register_identity(iid("team"), IdentityKind::User)
		.unwrap_err();
	assert_eq!(err.status_code(), 409);
}

#[test]
fn storage_fault_during_apply_rolls_back() {
	let engine = vault(FlakyStore::failing_after(2));
	let admin = engine.session(user("admin"));

	let document = json(
		r#"[
			{"op": "create_variable", "id": "one"},
			{"op": "create_group", "id": "readers"},
			{"op": "grant", "identity": "readers", "resource": "one", "privilege": "read"},
			{"op": "create_variable", "id": "two"},
			{"op": "grant", "identity": "bob", "resource": "two", "privilege": "write"},
			{"op": "create_variable", "id": "three"}
		]"#,
	);
	let err = admin.apply_policy(&ResourceId::root(), &document).unwrap_err();
	assert!(matches!(
		err,
		VaultError::Policy(PolicyError::Apply { statement: 5, .. })
	));
	assert!(err.is_internal());

	for id in ["one", "readers", "two", "three"] {
		assert!(!engine.resource_exists(&rid(id)), "{id} should be rolled back");
		assert!(!engine.store().contains(&rid(id)), "{id} slot should be discarded");
	}
	assert!(!engine.authorized(&iid("readers"), &rid("one"), Privilege::Read));
	assert!(engine.snapshot().unwrap().grants.is_empty());

	// The vault is still usable and the failed load did not count.
	let ok = admin
		.apply_policy(&ResourceId::root(), &json(r#"[{"op": "create_group", "id": "ops"}]"#))
		.unwrap();
	assert_eq!(ok.version, 1);
}

// ============================================================================
// Authorization boundary
// ============================================================================

#[test]
fn read_only_identity_gets_unauthorized_on_set() {
	let engine = vault(MemorySecretStore::new());
	let admin = engine.session(user("admin"));
	admin
		.apply_policy(
			&ResourceId::root(),
			&json(
				r#"[
					{"op": "create_variable", "id": "r"},
					{"op": "grant", "identity": "bob", "resource": "r", "privilege": "read"}
				]"#,
			),
		)
		.unwrap();

	let bob = engine.session(user("bob"));
	for value in ["x", ""] {
		let err = bob.set_secret(&rid("r"), value.into()).unwrap_err();
		assert!(
			matches!(err, VaultError::Unauthorized { privilege: Privilege::Write, .. }),
			"expected Unauthorized, got {err:?}"
		);
	}
	assert!(matches!(
		bob.rotate_secret(&rid("r"), SecretValue::unusable()),
		Err(VaultError::Unauthorized { .. })
	));
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn granting_twice_changes_nothing() {
	let engine = vault(MemorySecretStore::new());
	let admin = engine.session(user("admin"));
	admin
		.apply_policy(&ResourceId::root(), &json(r#"[{"op": "create_variable", "id": "g"}]"#))
		.unwrap();

	let grant = json(r#"[{"op": "grant", "identity": "bob", "resource": "g", "privilege": "read"}]"#);
	let first = admin.apply_policy(&ResourceId::root(), &grant).unwrap();
	let before: Vec<bool> = Privilege::ALL
		.iter()
		.map(|p| engine.authorized(&iid("bob"), &rid("g"), *p))
		.collect();

	let second = admin.apply_policy(&ResourceId::root(), &grant).unwrap();
	let after: Vec<bool> = Privilege::ALL
		.iter()
		.map(|p| engine.authorized(&iid("bob"), &rid("g"), *p))
		.collect();

	assert_eq!(first.grants_added, 1);
	assert_eq!(second.grants_added, 0);
	assert_eq!(before, after);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_writers_get_distinct_versions() {
	let engine = Arc::new(vault(MemorySecretStore::new()));
	engine
		.session(user("admin"))
		.apply_policy(
			&ResourceId::root(),
			&json(r#"[{"op": "create_variable", "id": "hot"}, {"op": "create_variable", "id": "cold"}]"#),
		)
		.unwrap();

	let handles: Vec<_> = (0..8)
		.map(|t| {
			let engine = Arc::clone(&engine);
			thread::spawn(move || {
				let admin = engine.session(user("admin"));
				let mut versions = Vec::new();
				for i in 0..20 {
					versions.push(admin.set_secret(&rid("hot"), format!("{t}-{i}").into()).unwrap());
					admin.set_secret(&rid("cold"), "c".into()).unwrap();
				}
				versions
			})
		})
		.collect();

	let mut all: Vec<u32> = handles
		.into_iter()
		.flat_map(|h| h.join().unwrap())
		.collect();
	all.sort_unstable();
	assert_eq!(all, (1..=160).collect::<Vec<u32>>());

	let history = engine.store().history(&rid("hot")).unwrap();
	assert_eq!(history.len(), 160);
}

#[test]
fn readers_never_see_partial_policy() {
	let engine = Arc::new(vault(MemorySecretStore::new()));
	let ids: Vec<String> = (0..50).map(|n| format!("bulk/v{n}")).collect();
	let statements: Vec<serde_json::Value> = ids
		.iter()
		.flat_map(|id| {
			[
				serde_json::json!({"op": "create_variable", "id": id}),
				serde_json::json!({"op": "grant", "identity": "bob", "resource": id, "privilege": "read"}),
			]
		})
		.collect();
	let document = json(&serde_json::Value::Array(statements).to_string());

	let reader = {
		let engine = Arc::clone(&engine);
		let expected = ids.len();
		thread::spawn(move || {
			let bob = engine.session(user("bob"));
			for _ in 0..200 {
				let visible = bob.list_resources(None).len();
				assert!(visible == 0 || visible == expected, "saw {visible} of {expected}");
			}
		})
	};

	engine
		.session(user("admin"))
		.apply_policy(&ResourceId::root(), &document)
		.unwrap();
	reader.join().unwrap();
}
