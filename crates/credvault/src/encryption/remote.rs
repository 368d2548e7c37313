use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::debug;

use crate::config::KeyDescriptor;
use crate::encryption::{EncryptionProvider, EncryptionResult, Key, KeyMaterial, ProviderError};

// Generated from proto/encryption.proto
pub mod proto {
	tonic::include_proto!("credvault.encryption.v1");
}

use proto::encryption_service_client::EncryptionServiceClient;
use proto::{DecryptRequest, EncryptRequest};

/// PKCS#11 HSMs report a decrypt under the wrong key as CKR_ENCRYPTED_DATA_INVALID.
const PKCS11_WRONG_KEY_MARKER: &str = "function 'C_Decrypt' returns 0x40";
/// DSM appliances prefix the equivalent failure with this return value.
const DSM_WRONG_KEY_PREFIX: &str = "Decrypt error: rv=48";

/// Classify a server-reported decrypt failure. Only the two known
/// wrong-key signatures are recoverable; any other message is fatal.
pub fn is_wrong_key_status(message: &str) -> bool {
	message.contains(PKCS11_WRONG_KEY_MARKER) || message.starts_with(DSM_WRONG_KEY_PREFIX)
}

#[derive(Debug, Clone)]
pub struct RemoteProviderConfig {
	/// Endpoint URI, e.g. `https://encryption.internal:50051`.
	pub address: String,
	/// Root certificate used to verify the server, PEM.
	pub ca_cert: Option<PathBuf>,
	/// Client identity presented to the server, PEM.
	pub client_cert: Option<PathBuf>,
	pub client_key: Option<PathBuf>,
	/// Deadline applied to every call, connection establishment included.
	pub timeout: Duration,
}

/// Client for the remote encryption service. Calls multiplex over one
/// lazily established HTTP/2 channel, so independent calls never queue
/// behind each other on a single connection.
#[derive(Debug, Clone)]
pub struct RemoteProvider {
	channel: Channel,
	timeout: Duration,
}

impl RemoteProvider {
	pub fn connect(config: &RemoteProviderConfig) -> Result<Self, ProviderError> {
		let mut endpoint = Endpoint::from_shared(config.address.clone())?
			.timeout(config.timeout)
			.connect_timeout(config.timeout);
		if let Some(ca_cert) = &config.ca_cert {
			let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(fs_err::read(ca_cert)?));
			if let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) {
				tls = tls.identity(Identity::from_pem(fs_err::read(cert)?, fs_err::read(key)?));
			}
			endpoint = endpoint.tls_config(tls)?;
		}
		debug!(address = %config.address, "connecting to remote encryption service");
		Ok(Self {
			channel: endpoint.connect_lazy(),
			timeout: config.timeout,
		})
	}

	fn label<'k>(&self, key: &'k Key) -> Result<&'k str, ProviderError> {
		match key.material() {
			KeyMaterial::Remote(label) => Ok(label.as_ref()),
			KeyMaterial::Aead(_) => Err(ProviderError::KeyMaterial(
				"key does not belong to the remote provider".to_string(),
			)),
		}
	}

	fn client(&self) -> EncryptionServiceClient<Channel> {
		EncryptionServiceClient::new(self.channel.clone())
	}
}

#[async_trait]
impl EncryptionProvider for RemoteProvider {
	fn make_key(&self, descriptor: &KeyDescriptor) -> Result<Key, ProviderError> {
		if descriptor.material.is_empty() {
			return Err(ProviderError::KeyMaterial(
				"remote keys need a non-empty label".to_string(),
			));
		}
		Ok(Key::new(KeyMaterial::Remote(Arc::from(
			descriptor.material.as_str(),
		))))
	}

	async fn encrypt(&self, key: &Key, plaintext: &str) -> Result<EncryptionResult, ProviderError> {
		let label = self.label(key)?;
		let mut request = tonic::Request::new(EncryptRequest {
			data: plaintext.as_bytes().to_vec(),
			key: label.to_string(),
		});
		request.set_timeout(self.timeout);
		let response = self
			.client()
			.encrypt(request)
			.await
			.map_err(|status| ProviderError::Rpc(Box::new(status)))?
			.into_inner();
		Ok(EncryptionResult {
			ciphertext: response.data,
			nonce: response.nonce,
		})
	}

	async fn decrypt(
		&self,
		key: &Key,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> Result<String, ProviderError> {
		let label = self.label(key)?;
		let mut request = tonic::Request::new(DecryptRequest {
			data: ciphertext.to_vec(),
			key: label.to_string(),
			nonce: nonce.to_vec(),
		});
		request.set_timeout(self.timeout);
		match self.client().decrypt(request).await {
			// The server owns the key material, so whatever bytes it hands
			// back are taken as-is; a non-utf-8 payload surfaces to the
			// mapper as an unexpected plaintext, not as an error.
			Ok(response) => Ok(String::from_utf8_lossy(&response.into_inner().data).into_owned()),
			Err(status) if is_wrong_key_status(status.message()) => Err(ProviderError::WrongKey),
			Err(status) => Err(ProviderError::Rpc(Box::new(status))),
		}
	}
}
