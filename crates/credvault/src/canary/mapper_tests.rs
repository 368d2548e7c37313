use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use async_trait::async_trait;
use uuid::Uuid;

use super::CanaryMapper;
use crate::canary::{CANARY_VALUE, CanaryRecord, CanaryStore};
use crate::config::KeyDescriptor;
use crate::encryption::registry::KeySet;
use crate::encryption::{
	EncryptionError, EncryptionProvider, EncryptionResult, Key, KeyMaterial, ProviderError,
};

fn key(label: &str) -> Key {
	Key::new(KeyMaterial::Remote(label.into()))
}

/// A canary whose ciphertext carries its own id, so the scripted provider
/// can recognize which record it is being asked to decrypt.
fn canary() -> CanaryRecord {
	let id = Uuid::new_v4();
	CanaryRecord {
		id,
		encrypted_value: id.as_bytes().to_vec(),
		nonce: vec![0; 12],
	}
}

enum Decryption {
	Value(&'static str),
	Fatal(&'static str),
}

/// Provider stub: every (key, canary) pair decrypts to a scripted outcome,
/// defaulting to a wrong-key failure like a real AEAD tag mismatch.
#[derive(Default)]
struct ScriptedProvider {
	outcomes: HashMap<(u64, Vec<u8>), Decryption>,
}

impl ScriptedProvider {
	fn new() -> Self {
		Self::default()
	}

	fn on_decrypt(&mut self, key: &Key, canary: &CanaryRecord, outcome: Decryption) {
		self.outcomes
			.insert((key.handle(), canary.encrypted_value.clone()), outcome);
	}

	fn matching(&mut self, key: &Key, canary: &CanaryRecord) {
		self.on_decrypt(key, canary, Decryption::Value(CANARY_VALUE));
	}
}

#[async_trait]
impl EncryptionProvider for ScriptedProvider {
	fn make_key(&self, descriptor: &KeyDescriptor) -> Result<Key, ProviderError> {
		Ok(key(&descriptor.material))
	}

	async fn encrypt(&self, _key: &Key, plaintext: &str) -> Result<EncryptionResult, ProviderError> {
		Ok(EncryptionResult {
			ciphertext: format!("minted:{plaintext}").into_bytes(),
			nonce: vec![9; 12],
		})
	}

	async fn decrypt(
		&self,
		key: &Key,
		ciphertext: &[u8],
		_nonce: &[u8],
	) -> Result<String, ProviderError> {
		match self.outcomes.get(&(key.handle(), ciphertext.to_vec())) {
			Some(Decryption::Value(value)) => Ok((*value).to_string()),
			Some(Decryption::Fatal(message)) => {
				Err(ProviderError::Rpc(Box::new(tonic::Status::internal(
					*message,
				))))
			},
			None => Err(ProviderError::WrongKey),
		}
	}
}

struct StubKeySet {
	keys: Vec<Key>,
	active: Option<usize>,
}

impl StubKeySet {
	fn single(key: Key) -> Self {
		Self {
			keys: vec![key],
			active: Some(0),
		}
	}
}

impl KeySet for StubKeySet {
	fn keys(&self) -> &[Key] {
		&self.keys
	}

	fn active_key(&self) -> Option<&Key> {
		self.active.map(|index| &self.keys[index])
	}
}

struct RecordingStore {
	existing: Vec<CanaryRecord>,
	saved: Mutex<Vec<CanaryRecord>>,
}

impl RecordingStore {
	fn new(existing: Vec<CanaryRecord>) -> Self {
		Self {
			existing,
			saved: Mutex::new(Vec::new()),
		}
	}

	fn saved(&self) -> Vec<CanaryRecord> {
		self.saved.lock().unwrap().clone()
	}
}

#[async_trait]
impl CanaryStore for RecordingStore {
	async fn find_all(&self) -> anyhow::Result<Vec<CanaryRecord>> {
		Ok(self.existing.clone())
	}

	async fn save(&self, encrypted_value: Vec<u8>, nonce: Vec<u8>) -> anyhow::Result<CanaryRecord> {
		let record = CanaryRecord {
			id: Uuid::new_v4(),
			encrypted_value,
			nonce,
		};
		self.saved.lock().unwrap().push(record.clone());
		Ok(record)
	}
}

struct FailingStore;

#[async_trait]
impl CanaryStore for FailingStore {
	async fn find_all(&self) -> anyhow::Result<Vec<CanaryRecord>> {
		Err(anyhow::anyhow!("canary table unreachable"))
	}

	async fn save(&self, _encrypted_value: Vec<u8>, _nonce: Vec<u8>) -> anyhow::Result<CanaryRecord> {
		Err(anyhow::anyhow!("canary table unreachable"))
	}
}

#[tokio::test]
async fn startup_fails_without_any_keys() {
	let keys = StubKeySet {
		keys: Vec::new(),
		active: None,
	};
	let result = CanaryMapper::reconcile(&keys, &ScriptedProvider::new(), &RecordingStore::new(vec![])).await;
	assert_matches!(result, Err(EncryptionError::NoActiveKey));
}

#[tokio::test]
async fn mints_a_canary_for_a_new_active_key() {
	let active = key("active");
	let keys = StubKeySet::single(active.clone());
	let store = RecordingStore::new(vec![]);

	let mapper = CanaryMapper::reconcile(&keys, &ScriptedProvider::new(), &store)
		.await
		.unwrap();

	let saved = store.saved();
	assert_eq!(saved.len(), 1);
	assert_eq!(mapper.encryption_key_map().len(), 1);
	assert_eq!(mapper.active_uuid(), saved[0].id);
	assert_eq!(mapper.key_for(saved[0].id), Some(&active));
}

#[tokio::test]
async fn stale_canary_is_left_untouched_and_a_new_one_is_minted() {
	let active = key("active");
	let stale = canary();
	let keys = StubKeySet::single(active.clone());
	let store = RecordingStore::new(vec![stale.clone()]);

	// No script for (active, stale): the decrypt fails as wrong-key.
	let mapper = CanaryMapper::reconcile(&keys, &ScriptedProvider::new(), &store)
		.await
		.unwrap();

	assert_eq!(store.saved().len(), 1);
	assert_eq!(mapper.encryption_key_map().len(), 1);
	assert!(mapper.key_for(stale.id).is_none());
	assert_ne!(mapper.active_uuid(), stale.id);
}

#[tokio::test]
async fn unknown_decrypt_failures_abort_startup() {
	let active = key("active");
	let stored = canary();
	let mut provider = ScriptedProvider::new();
	provider.on_decrypt(
		&active,
		&stored,
		Decryption::Fatal("I don't know what 0x41 means and neither do you"),
	);
	let keys = StubKeySet::single(active);
	let store = RecordingStore::new(vec![stored]);

	let err = CanaryMapper::reconcile(&keys, &provider, &store)
		.await
		.unwrap_err();
	assert_matches!(err, EncryptionError::EncryptionInfrastructure(_));
	assert!(err.to_string().contains("0x41"));
	assert!(store.saved().is_empty());
}

#[tokio::test]
async fn matching_canary_is_reused_without_saving() {
	let active = key("active");
	let stored = canary();
	let mut provider = ScriptedProvider::new();
	provider.matching(&active, &stored);
	let keys = StubKeySet::single(active.clone());
	let store = RecordingStore::new(vec![stored.clone()]);

	let mapper = CanaryMapper::reconcile(&keys, &provider, &store)
		.await
		.unwrap();

	assert!(store.saved().is_empty());
	assert_eq!(mapper.encryption_key_map().len(), 1);
	assert_eq!(mapper.active_uuid(), stored.id);
	assert_eq!(mapper.key_for(stored.id), Some(&active));
}

#[tokio::test]
async fn binds_every_key_with_a_matching_canary() {
	let k1 = key("retired-1");
	let k_active = key("active");
	let k2 = key("retired-2");
	let c1 = canary();
	let c_active = canary();
	let c2 = canary();

	let mut provider = ScriptedProvider::new();
	provider.matching(&k1, &c1);
	provider.matching(&k_active, &c_active);
	provider.matching(&k2, &c2);

	let keys = StubKeySet {
		keys: vec![k1.clone(), k_active.clone(), k2.clone()],
		active: Some(1),
	};
	// Store order is not the key order; reconciliation must not care.
	let store = RecordingStore::new(vec![c2.clone(), c1.clone(), c_active.clone()]);

	let mapper = CanaryMapper::reconcile(&keys, &provider, &store)
		.await
		.unwrap();

	assert!(store.saved().is_empty());
	assert_eq!(mapper.encryption_key_map().len(), 3);
	assert_eq!(mapper.active_uuid(), c_active.id);
	assert_eq!(mapper.key_for(c1.id), Some(&k1));
	assert_eq!(mapper.key_for(c_active.id), Some(&k_active));
	assert_eq!(mapper.key_for(c2.id), Some(&k2));
}

#[tokio::test]
async fn retired_key_without_a_canary_is_dropped() {
	let k1 = key("retired-1");
	let k_active = key("active");
	let k2 = key("retired-2");
	let c1 = canary();
	let c_active = canary();

	let mut provider = ScriptedProvider::new();
	provider.matching(&k1, &c1);
	provider.matching(&k_active, &c_active);

	let keys = StubKeySet {
		keys: vec![k1.clone(), k_active.clone(), k2.clone()],
		active: Some(1),
	};
	let store = RecordingStore::new(vec![c1.clone(), c_active.clone()]);

	let mapper = CanaryMapper::reconcile(&keys, &provider, &store)
		.await
		.unwrap();

	assert!(store.saved().is_empty());
	assert_eq!(mapper.encryption_key_map().len(), 2);
	assert!(
		mapper
			.encryption_key_map()
			.values()
			.all(|bound| bound != &k2)
	);
}

#[tokio::test]
async fn first_configured_key_wins_a_shared_canary() {
	let first = key("first");
	let second = key("second");
	let shared = canary();

	// Operator error: both keys hold the same material, so both decrypt it.
	let mut provider = ScriptedProvider::new();
	provider.matching(&first, &shared);
	provider.matching(&second, &shared);

	let keys = StubKeySet {
		keys: vec![first.clone(), second.clone()],
		active: Some(0),
	};
	let store = RecordingStore::new(vec![shared.clone()]);

	let mapper = CanaryMapper::reconcile(&keys, &provider, &store)
		.await
		.unwrap();

	assert!(store.saved().is_empty());
	assert_eq!(mapper.encryption_key_map().len(), 1);
	assert_eq!(mapper.key_for(shared.id), Some(&first));
}

#[tokio::test]
async fn unexpected_plaintext_is_treated_as_wrong_key() {
	let active = key("active");
	let stored = canary();
	let mut provider = ScriptedProvider::new();
	provider.on_decrypt(&active, &stored, Decryption::Value("something else entirely"));
	let keys = StubKeySet::single(active.clone());
	let store = RecordingStore::new(vec![stored.clone()]);

	let mapper = CanaryMapper::reconcile(&keys, &provider, &store)
		.await
		.unwrap();

	assert_eq!(store.saved().len(), 1);
	assert!(mapper.key_for(stored.id).is_none());
	assert_eq!(mapper.key_for(mapper.active_uuid()), Some(&active));
}

#[tokio::test]
async fn unknown_canary_ids_surface_as_errors() {
	let active = key("active");
	let keys = StubKeySet::single(active);
	let store = RecordingStore::new(vec![]);

	let mapper = CanaryMapper::reconcile(&keys, &ScriptedProvider::new(), &store)
		.await
		.unwrap();

	let unknown = Uuid::new_v4();
	assert!(mapper.key_for(unknown).is_none());
	assert_matches!(
		mapper.require_key(unknown),
		Err(EncryptionError::UnknownCanary(id)) if id == unknown
	);
}

#[tokio::test]
async fn store_failures_abort_startup() {
	let active = key("active");
	let keys = StubKeySet::single(active);
	let result = CanaryMapper::reconcile(&keys, &ScriptedProvider::new(), &FailingStore).await;
	assert_matches!(result, Err(EncryptionError::Store(_)));
}
