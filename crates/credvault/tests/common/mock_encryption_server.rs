// Mock remote encryption service for exercising the client over a real
// gRPC connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use credvault::encryption::remote::proto::encryption_service_server::{
	EncryptionService, EncryptionServiceServer,
};
use credvault::encryption::remote::proto::{
	DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse,
};

/// Key labels with scripted failure behavior, mimicking the error strings
/// real HSM and DSM backends produce.
pub const HSM_WRONG_KEY_LABEL: &str = "hsm-wrong-key";
pub const DSM_WRONG_KEY_LABEL: &str = "dsm-wrong-key";
pub const HSM_UNKNOWN_ERROR_LABEL: &str = "hsm-unknown";
pub const SLOW_LABEL: &str = "slow";

pub struct MockEncryptionService {
	keys: HashMap<String, Aes256Gcm>,
}

impl MockEncryptionService {
	fn new() -> Self {
		let mut keys = HashMap::new();
		keys.insert(
			"primary".to_string(),
			Aes256Gcm::new_from_slice(&[0x11; 32]).unwrap(),
		);
		keys.insert(
			"secondary".to_string(),
			Aes256Gcm::new_from_slice(&[0x22; 32]).unwrap(),
		);
		Self { keys }
	}
}

#[tonic::async_trait]
impl EncryptionService for MockEncryptionService {
	async fn encrypt(
		&self,
		request: Request<EncryptRequest>,
	) -> Result<Response<EncryptResponse>, Status> {
		let req = request.into_inner();
		let cipher = self
			.keys
			.get(&req.key)
			.ok_or_else(|| Status::not_found(format!("unknown key {}", req.key)))?;
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let data = cipher
			.encrypt(&nonce, req.data.as_slice())
			.map_err(|_| Status::internal("encryption failed"))?;
		Ok(Response::new(EncryptResponse {
			data,
			nonce: nonce.to_vec(),
		}))
	}

	async fn decrypt(
		&self,
		request: Request<DecryptRequest>,
	) -> Result<Response<DecryptResponse>, Status> {
		let req = request.into_inner();
		match req.key.as_str() {
			HSM_WRONG_KEY_LABEL => {
				return Err(Status::internal(
					"CKR_ENCRYPTED_DATA_INVALID: function 'C_Decrypt' returns 0x40",
				));
			},
			DSM_WRONG_KEY_LABEL => {
				return Err(Status::internal("Decrypt error: rv=48, key mismatch"));
			},
			HSM_UNKNOWN_ERROR_LABEL => {
				return Err(Status::internal(
					"I don't know what 0x41 means and neither do you",
				));
			},
			SLOW_LABEL => {
				tokio::time::sleep(Duration::from_secs(5)).await;
				return Err(Status::deadline_exceeded("too slow"));
			},
			_ => {},
		}
		let cipher = self
			.keys
			.get(&req.key)
			.ok_or_else(|| Status::not_found(format!("unknown key {}", req.key)))?;
		if req.nonce.len() != 12 {
			return Err(Status::invalid_argument("nonce must be 12 bytes"));
		}
		let data = cipher
			.decrypt(Nonce::from_slice(&req.nonce), req.data.as_slice())
			.map_err(|_| Status::internal("Decrypt error: rv=48, authentication failed"))?;
		Ok(Response::new(DecryptResponse { data }))
	}
}

pub async fn start_mock_encryption_server() -> anyhow::Result<SocketAddr> {
	let addr = SocketAddr::from(([127, 0, 0, 1], 0));
	let listener = tokio::net::TcpListener::bind(addr).await?;
	let addr = listener.local_addr()?;

	let service = MockEncryptionService::new();
	tokio::spawn(async move {
		Server::builder()
			.add_service(EncryptionServiceServer::new(service))
			.serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
			.await
			.expect("mock encryption server failed");
	});

	Ok(addr)
}
