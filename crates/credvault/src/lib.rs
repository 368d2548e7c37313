//! Cryptographic core for the credential service: the configured set of
//! data-encryption keys and their providers, the canary mapping that pins
//! stable identifiers onto key material across restarts, and the X.509
//! certificate generator used by credential issuance.

pub mod ca;
pub mod canary;
pub mod config;
pub mod encryption;

pub use canary::mapper::CanaryMapper;
pub use canary::{CANARY_VALUE, CanaryRecord, CanaryStore};
pub use encryption::registry::KeyRegistry;
pub use encryption::service::{EncryptedValue, EncryptionService};
pub use encryption::{EncryptionError, EncryptionProvider, EncryptionResult, Key};
