use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;

use crate::config::KeyDescriptor;
use crate::encryption::{EncryptionProvider, EncryptionResult, Key, KeyMaterial, ProviderError};

pub(crate) const NONCE_LENGTH: usize = 12;

/// In-process AES-256-GCM provider. Key material is hex-encoded in the
/// descriptor; every encryption draws a fresh 96-bit nonce from the OS RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct AeadProvider;

impl AeadProvider {
	pub fn new() -> Self {
		Self
	}

	fn cipher<'k>(&self, key: &'k Key) -> Result<&'k Aes256Gcm, ProviderError> {
		match key.material() {
			KeyMaterial::Aead(cipher) => Ok(cipher.as_ref()),
			KeyMaterial::Remote(_) => Err(ProviderError::KeyMaterial(
				"key does not belong to the in-process provider".to_string(),
			)),
		}
	}
}

#[async_trait]
impl EncryptionProvider for AeadProvider {
	fn make_key(&self, descriptor: &KeyDescriptor) -> Result<Key, ProviderError> {
		let bytes = hex::decode(&descriptor.material)
			.map_err(|e| ProviderError::KeyMaterial(format!("invalid hex key material: {e}")))?;
		let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| {
			ProviderError::KeyMaterial(format!(
				"AES-256-GCM requires a 32 byte key, got {}",
				bytes.len()
			))
		})?;
		Ok(Key::new(KeyMaterial::Aead(Arc::new(cipher))))
	}

	async fn encrypt(&self, key: &Key, plaintext: &str) -> Result<EncryptionResult, ProviderError> {
		let cipher = self.cipher(key)?;
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = cipher
			.encrypt(&nonce, plaintext.as_bytes())
			.map_err(|_| ProviderError::Malformed("AEAD encryption failed".to_string()))?;
		Ok(EncryptionResult {
			ciphertext,
			nonce: nonce.to_vec(),
		})
	}

	async fn decrypt(
		&self,
		key: &Key,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> Result<String, ProviderError> {
		let cipher = self.cipher(key)?;
		if nonce.len() != NONCE_LENGTH {
			return Err(ProviderError::Malformed(format!(
				"nonce must be {NONCE_LENGTH} bytes, got {}",
				nonce.len()
			)));
		}
		// A tag mismatch is indistinguishable from decrypting under the
		// wrong key, which is exactly how canary scanning consumes it.
		let plaintext = cipher
			.decrypt(Nonce::from_slice(nonce), ciphertext)
			.map_err(|_| ProviderError::WrongKey)?;
		String::from_utf8(plaintext)
			.map_err(|e| ProviderError::Malformed(format!("plaintext is not utf-8: {e}")))
	}
}
