use std::time::SystemTime;

use base64::Engine;
use rand::RngExt;
use serde::{Deserialize, Serialize};

mod generator;
mod material;
mod signer;

pub use generator::{CertificateGenerator, KeyPair};
pub use material::CaCredential;

#[derive(Debug, thiserror::Error)]
pub enum CaError {
	#[error("invalid CA material: {0}")]
	InvalidCaMaterial(String),

	#[error("certificate signing failed: {0}")]
	SigningFailure(String),

	#[error("invalid certificate parameters: {0}")]
	InvalidParameters(String),
}

/// What a caller asks the generator for: subject, lifetime, CA bit and the
/// optional extension payloads. Everything else about the certificate is
/// fixed policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateParameters {
	/// X.500 subject, e.g. `CN=example.test,O=example`.
	pub subject: String,
	pub duration_days: u32,
	#[serde(default)]
	pub is_ca: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key_usage: Option<Vec<KeyUsageBit>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extended_key_usage: Option<Vec<ExtendedKeyUsageKind>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subject_alternative_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyUsageBit {
	DigitalSignature,
	NonRepudiation,
	KeyEncipherment,
	DataEncipherment,
	KeyAgreement,
	KeyCertSign,
	CrlSign,
	EncipherOnly,
	DecipherOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtendedKeyUsageKind {
	ServerAuth,
	ClientAuth,
	CodeSigning,
	EmailProtection,
	TimeStamping,
	OcspSigning,
}

/// Injected time source so certificate validity is deterministic in tests.
pub trait Clock: Send + Sync {
	fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> SystemTime {
		SystemTime::now()
	}
}

/// Injected randomness for certificate serial numbers.
pub trait SerialNumberSource: Send + Sync {
	/// 20 random bytes; the generator normalizes them into a positive
	/// 159-bit integer.
	fn generate(&self) -> [u8; 20];
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSerialSource;

impl SerialNumberSource for RandomSerialSource {
	fn generate(&self) -> [u8; 20] {
		let mut bytes = [0u8; 20];
		rand::rng().fill(bytes.as_mut_slice());
		bytes
	}
}

/// PEM-armour a DER certificate, the form callers usually persist.
pub fn to_pem(der: &[u8]) -> String {
	let encoded = base64::engine::general_purpose::STANDARD.encode(der);
	let mut pem = String::with_capacity(encoded.len() + 64);
	pem.push_str("-----BEGIN CERTIFICATE-----\n");
	for chunk in encoded.as_bytes().chunks(64) {
		pem.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
		pem.push('\n');
	}
	pem.push_str("-----END CERTIFICATE-----\n");
	pem
}
