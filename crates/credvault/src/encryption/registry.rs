use crate::config::KeyDescriptor;
use crate::encryption::{EncryptionError, EncryptionProvider, Key};

/// Read-only view over the configured key set. The canary mapper consumes
/// this instead of the registry directly so tests can drive it with stubs.
pub trait KeySet: Send + Sync {
	/// Configured keys, in configured order.
	fn keys(&self) -> &[Key];

	fn active_key(&self) -> Option<&Key>;
}

/// The configured key set: every descriptor materialized into a `Key`, in
/// configured order, with exactly one of them marked active.
#[derive(Debug)]
pub struct KeyRegistry {
	keys: Vec<Key>,
	active: usize,
}

impl KeyRegistry {
	pub fn new(
		provider: &dyn EncryptionProvider,
		descriptors: &[KeyDescriptor],
	) -> Result<Self, EncryptionError> {
		let mut active = None;
		for (index, descriptor) in descriptors.iter().enumerate() {
			if descriptor.active {
				if active.is_some() {
					return Err(EncryptionError::NoActiveKey);
				}
				active = Some(index);
			}
		}
		let Some(active) = active else {
			return Err(EncryptionError::NoActiveKey);
		};
		let keys = descriptors
			.iter()
			.map(|descriptor| provider.make_key(descriptor))
			.collect::<Result<Vec<_>, _>>()
			.map_err(EncryptionError::EncryptionInfrastructure)?;
		Ok(Self { keys, active })
	}

	pub fn keys(&self) -> &[Key] {
		&self.keys
	}

	pub fn active_key(&self) -> &Key {
		&self.keys[self.active]
	}
}

impl KeySet for KeyRegistry {
	fn keys(&self) -> &[Key] {
		&self.keys
	}

	fn active_key(&self) -> Option<&Key> {
		Some(&self.keys[self.active])
	}
}
