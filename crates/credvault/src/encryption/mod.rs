use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::Aes256Gcm;
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{KeyDescriptor, ProviderKind};

pub mod aead;
pub mod registry;
pub mod remote;
pub mod service;

/// Errors surfaced by a concrete encryption provider.
///
/// `WrongKey` is the one recoverable kind: it means the ciphertext was
/// produced under different key material, which the canary reconciliation
/// expects to see while scanning. Everything else is fatal to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
	#[error("decryption failed with a mismatched key")]
	WrongKey,

	#[error("key material: {0}")]
	KeyMaterial(String),

	#[error("malformed payload: {0}")]
	Malformed(String),

	#[error("encryption rpc: {0}")]
	Rpc(#[from] Box<tonic::Status>),

	#[error("encryption transport: {0}")]
	Transport(#[from] tonic::transport::Error),

	#[error("{0}")]
	Io(#[from] std::io::Error),
}

impl ProviderError {
	pub fn is_wrong_key(&self) -> bool {
		matches!(self, ProviderError::WrongKey)
	}
}

/// Errors surfaced by the key registry, canary mapper and runtime facade.
#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
	#[error("no active encryption key is configured")]
	NoActiveKey,

	#[error("encryption infrastructure: {0}")]
	EncryptionInfrastructure(#[source] ProviderError),

	#[error("no encryption key bound to canary {0}")]
	UnknownCanary(Uuid),

	#[error("canary store: {0}")]
	Store(anyhow::Error),
}

static NEXT_KEY_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to symmetric key material owned by some provider.
///
/// A `Key` never exposes its material; equality is identity of the handle,
/// not of the underlying bytes, so two keys wrapping the same material are
/// still distinct keys.
#[derive(Clone)]
pub struct Key {
	handle: u64,
	material: KeyMaterial,
}

#[derive(Clone)]
pub(crate) enum KeyMaterial {
	/// An AES-256-GCM cipher held in process.
	Aead(Arc<Aes256Gcm>),
	/// A label the remote encryption service resolves server-side.
	Remote(Arc<str>),
}

impl Key {
	pub(crate) fn new(material: KeyMaterial) -> Self {
		Self {
			handle: NEXT_KEY_HANDLE.fetch_add(1, Ordering::Relaxed),
			material,
		}
	}

	pub(crate) fn material(&self) -> &KeyMaterial {
		&self.material
	}

	pub(crate) fn handle(&self) -> u64 {
		self.handle
	}

	pub fn provider_kind(&self) -> ProviderKind {
		match self.material {
			KeyMaterial::Aead(_) => ProviderKind::InProcess,
			KeyMaterial::Remote(_) => ProviderKind::Remote,
		}
	}
}

impl PartialEq for Key {
	fn eq(&self, other: &Self) -> bool {
		self.handle == other.handle
	}
}

impl Eq for Key {}

impl std::hash::Hash for Key {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.handle.hash(state);
	}
}

impl fmt::Debug for Key {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Key")
			.field("handle", &self.handle)
			.field("provider", &self.provider_kind())
			.finish()
	}
}

/// Ciphertext and the nonce it was produced under. The caller stores the
/// pair together with the canary id of the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResult {
	pub ciphertext: Vec<u8>,
	pub nonce: Vec<u8>,
}

/// Contract over the concrete encryption backends.
///
/// Implementations are safe for concurrent invocation; no call mutates
/// provider state observable to other calls.
#[async_trait]
pub trait EncryptionProvider: Send + Sync {
	/// Materialize a configured descriptor into an opaque key handle.
	fn make_key(&self, descriptor: &KeyDescriptor) -> Result<Key, ProviderError>;

	async fn encrypt(&self, key: &Key, plaintext: &str) -> Result<EncryptionResult, ProviderError>;

	async fn decrypt(
		&self,
		key: &Key,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> Result<String, ProviderError>;
}
