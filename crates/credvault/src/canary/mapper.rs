use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::canary::{CANARY_VALUE, CanaryStore};
use crate::encryption::registry::KeySet;
use crate::encryption::{EncryptionError, EncryptionProvider, Key};

#[cfg(test)]
#[path = "mapper_tests.rs"]
mod tests;

/// The reconciled binding between stored canary ids and configured keys.
///
/// Built once at startup, before any caller is served; afterwards it is
/// immutable and safe to read from any number of threads without locks.
#[derive(Debug)]
pub struct CanaryMapper {
	bindings: HashMap<Uuid, Key>,
	active_id: Uuid,
}

impl CanaryMapper {
	/// Bind every configured key to the canary it can still decrypt.
	///
	/// Keys are visited in configured order and each stored canary is
	/// consumed by at most one key, so a duplicated key loses to the first
	/// occurrence. A wrong-key decryption failure moves the scan along;
	/// any other provider failure aborts startup. An active key with no
	/// matching canary gets a fresh one minted and saved; a retired key
	/// with no match is dropped for this run.
	pub async fn reconcile(
		keys: &dyn KeySet,
		provider: &dyn EncryptionProvider,
		store: &dyn CanaryStore,
	) -> Result<Self, EncryptionError> {
		let all_keys = keys.keys();
		let active = keys.active_key().ok_or(EncryptionError::NoActiveKey)?;
		if all_keys.is_empty() {
			return Err(EncryptionError::NoActiveKey);
		}

		let canaries = store.find_all().await.map_err(EncryptionError::Store)?;
		let mut consumed = vec![false; canaries.len()];
		let mut bindings = HashMap::new();
		let mut active_id = None;

		for key in all_keys {
			let mut matched = None;
			for (index, canary) in canaries.iter().enumerate() {
				if consumed[index] {
					continue;
				}
				match provider
					.decrypt(key, &canary.encrypted_value, &canary.nonce)
					.await
				{
					Ok(plaintext) if plaintext == CANARY_VALUE => {
						consumed[index] = true;
						matched = Some(canary.id);
						break;
					},
					Ok(_) => {
						// Undocumented provider behavior: a decrypt that
						// "succeeds" under the wrong key. Treated exactly
						// like a tag failure, but worth a trace.
						warn!(
							canary = %canary.id,
							key = ?key,
							"canary decrypted to an unexpected value; treating as a key mismatch"
						);
					},
					Err(e) if e.is_wrong_key() => {},
					Err(e) => return Err(EncryptionError::EncryptionInfrastructure(e)),
				}
			}

			let id = match matched {
				Some(id) => id,
				None if key == active => {
					let encrypted = provider
						.encrypt(key, CANARY_VALUE)
						.await
						.map_err(EncryptionError::EncryptionInfrastructure)?;
					let record = store
						.save(encrypted.ciphertext, encrypted.nonce)
						.await
						.map_err(EncryptionError::Store)?;
					info!(canary = %record.id, "no canary matched the active key; minted a new one");
					record.id
				},
				None => {
					debug!(key = ?key, "no canary matched a retired key; dropping it for this run");
					continue;
				},
			};

			bindings.insert(id, key.clone());
			if key == active {
				active_id = Some(id);
			}
		}

		Ok(Self {
			bindings,
			// The active key either matched a canary or minted one above.
			active_id: active_id.expect("active key is bound after reconciliation"),
		})
	}

	/// The full id → key binding derived at startup.
	pub fn encryption_key_map(&self) -> &HashMap<Uuid, Key> {
		&self.bindings
	}

	/// Id of the binding whose key encrypts new data.
	pub fn active_uuid(&self) -> Uuid {
		self.active_id
	}

	pub fn key_for(&self, id: Uuid) -> Option<&Key> {
		self.bindings.get(&id)
	}

	/// Like [`key_for`](Self::key_for) but surfaces ids bound to retired or
	/// missing keys as [`EncryptionError::UnknownCanary`].
	pub fn require_key(&self, id: Uuid) -> Result<&Key, EncryptionError> {
		self.key_for(id).ok_or(EncryptionError::UnknownCanary(id))
	}
}
