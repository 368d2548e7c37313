use std::sync::Arc;

use uuid::Uuid;

use crate::canary::mapper::CanaryMapper;
use crate::encryption::{EncryptionError, EncryptionProvider};

/// The on-disk form of an encrypted credential: the ciphertext, its nonce,
/// and the canary id of the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
	pub canary_id: Uuid,
	pub ciphertext: Vec<u8>,
	pub nonce: Vec<u8>,
}

/// Runtime facade over the reconciled key set: encrypts with the active
/// key, decrypts by resolving a stored canary id back to its key.
pub struct EncryptionService {
	provider: Arc<dyn EncryptionProvider>,
	mapper: Arc<CanaryMapper>,
}

impl EncryptionService {
	pub fn new(provider: Arc<dyn EncryptionProvider>, mapper: Arc<CanaryMapper>) -> Self {
		Self { provider, mapper }
	}

	pub async fn encrypt(&self, plaintext: &str) -> Result<EncryptedValue, EncryptionError> {
		let canary_id = self.mapper.active_uuid();
		let key = self.mapper.require_key(canary_id)?;
		let result = self
			.provider
			.encrypt(key, plaintext)
			.await
			.map_err(EncryptionError::EncryptionInfrastructure)?;
		Ok(EncryptedValue {
			canary_id,
			ciphertext: result.ciphertext,
			nonce: result.nonce,
		})
	}

	/// Decrypt a stored value. Outside reconciliation a wrong-key failure
	/// means the stored triple is corrupt, so every provider failure here
	/// is infrastructure.
	pub async fn decrypt(
		&self,
		canary_id: Uuid,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> Result<String, EncryptionError> {
		let key = self.mapper.require_key(canary_id)?;
		self.provider
			.decrypt(key, ciphertext, nonce)
			.await
			.map_err(EncryptionError::EncryptionInfrastructure)
	}
}
