use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

pub mod mapper;

/// The well-known plaintext every canary protects. Decrypting a canary to
/// exactly this value proves the key that produced it is still present.
pub const CANARY_VALUE: &str = "HEALTH_CHECK";

/// A persisted canary: ciphertext and nonce of [`CANARY_VALUE`] under one
/// key. The id is assigned by the store on first save and never changes;
/// it is the stable identifier stored next to every credential ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanaryRecord {
	pub id: Uuid,
	pub encrypted_value: Vec<u8>,
	pub nonce: Vec<u8>,
}

/// Persistence contract for canary records. `find_all` carries no ordering
/// guarantee. The store is only written during startup reconciliation.
#[async_trait]
pub trait CanaryStore: Send + Sync {
	async fn find_all(&self) -> anyhow::Result<Vec<CanaryRecord>>;

	/// Persist a new canary and return it with its assigned id.
	async fn save(&self, encrypted_value: Vec<u8>, nonce: Vec<u8>) -> anyhow::Result<CanaryRecord>;
}

/// In-memory store for tests and embedders that run without a database.
#[derive(Debug, Default)]
pub struct MemoryCanaryStore {
	records: Mutex<Vec<CanaryRecord>>,
}

impl MemoryCanaryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl CanaryStore for MemoryCanaryStore {
	async fn find_all(&self) -> anyhow::Result<Vec<CanaryRecord>> {
		Ok(self.records.lock().expect("canary store poisoned").clone())
	}

	async fn save(&self, encrypted_value: Vec<u8>, nonce: Vec<u8>) -> anyhow::Result<CanaryRecord> {
		let record = CanaryRecord {
			id: Uuid::new_v4(),
			encrypted_value,
			nonce,
		};
		self.records
			.lock()
			.expect("canary store poisoned")
			.push(record.clone());
		Ok(record)
	}
}
