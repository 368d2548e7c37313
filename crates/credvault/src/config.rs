use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encryption::remote::RemoteProviderConfig;

/// Top-level settings for the cryptographic core, usually loaded from the
/// service's YAML configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
	pub encryption: EncryptionSettings,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote: Option<RemoteSettings>,
}

impl Settings {
	pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
		Ok(serde_yaml::from_str(contents)?)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EncryptionSettings {
	pub provider: ProviderKind,
	pub keys: Vec<KeyDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
	/// AES-256-GCM with key material held in process.
	InProcess,
	/// Keys live behind the remote encryption service.
	Remote,
}

/// One configured key. `material` is provider-specific: a hex-encoded
/// 256-bit key for the in-process provider, a key label for the remote one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KeyDescriptor {
	#[serde(default)]
	pub active: bool,
	pub material: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteSettings {
	pub address: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ca_cert: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_cert: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_key: Option<PathBuf>,
	#[serde(with = "serde_dur", default = "default_timeout")]
	pub timeout: Duration,
}

fn default_timeout() -> Duration {
	Duration::from_secs(10)
}

impl RemoteSettings {
	pub fn provider_config(&self) -> RemoteProviderConfig {
		RemoteProviderConfig {
			address: self.address.clone(),
			ca_cert: self.ca_cert.clone(),
			client_cert: self.client_cert.clone(),
			client_key: self.client_key.clone(),
			timeout: self.timeout,
		}
	}
}

pub(crate) mod serde_dur {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_secs(u64::deserialize(deserializer)?))
	}
}
