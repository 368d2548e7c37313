use std::io::Cursor;

use der::Decode;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rustls_pemfile::Item;
use sha1::{Digest, Sha1};
use x509_cert::name::Name;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::ParsedExtension;
use x509_parser::oid_registry::OID_X509_EXT_SUBJECT_KEY_IDENTIFIER;

use crate::ca::CaError;

/// A stored CA credential as it arrives from the credential store: both
/// halves PEM-encoded. The private key must be a standalone traditional
/// PEM private-key object (PKCS#1 `RSA PRIVATE KEY` or PKCS#8
/// `PRIVATE KEY`); encrypted PEM and PKCS#12 bundles are not supported.
#[derive(Debug, Clone)]
pub struct CaCredential {
	pub certificate: String,
	pub private_key: String,
}

/// What issuing a certificate needs from the CA: its subject, the key
/// identifier and serial the new certificate's AKI will point at, and the
/// signing key.
pub(crate) struct CaMaterial {
	pub subject: Name,
	pub ski: Vec<u8>,
	pub serial: Vec<u8>,
	pub signing_key: RsaPrivateKey,
}

pub(crate) fn parse(credential: &CaCredential) -> Result<CaMaterial, CaError> {
	let cert_der = read_pem_certificate(credential.certificate.as_bytes())?;
	let (_, cert) = x509_parser::parse_x509_certificate(&cert_der)
		.map_err(|e| CaError::InvalidCaMaterial(format!("CA certificate: {e}")))?;
	let subject = Name::from_der(cert.subject().as_raw())
		.map_err(|e| CaError::InvalidCaMaterial(format!("CA subject: {e}")))?;
	let ski = match subject_key_identifier(&cert)? {
		Some(ski) => ski,
		// The CA pre-dates the SKI extension; derive the identifier from
		// its public key the same way a fresh certificate gets one.
		None => Sha1::digest(cert.public_key().subject_public_key.data.as_ref()).to_vec(),
	};
	let serial = cert.raw_serial().to_vec();
	let signing_key = read_pem_private_key(credential.private_key.as_bytes())?;
	Ok(CaMaterial {
		subject,
		ski,
		serial,
		signing_key,
	})
}

fn subject_key_identifier(cert: &X509Certificate<'_>) -> Result<Option<Vec<u8>>, CaError> {
	let Some(ext) = cert
		.get_extension_unique(&OID_X509_EXT_SUBJECT_KEY_IDENTIFIER)
		.map_err(|e| CaError::InvalidCaMaterial(format!("CA extensions: {e}")))?
	else {
		return Ok(None);
	};
	match ext.parsed_extension() {
		ParsedExtension::SubjectKeyIdentifier(ki) => Ok(Some(ki.0.to_vec())),
		_ => Ok(None),
	}
}

fn read_pem_certificate(mut pem: &[u8]) -> Result<Vec<u8>, CaError> {
	let mut reader = std::io::BufReader::new(Cursor::new(&mut pem));
	let parsed = rustls_pemfile::read_one(&mut reader)
		.map_err(|e| CaError::InvalidCaMaterial(e.to_string()))?
		.ok_or_else(|| CaError::InvalidCaMaterial("no certificate in CA pem".to_string()))?;
	let Item::X509Certificate(der) = parsed else {
		return Err(CaError::InvalidCaMaterial(
			"CA pem is not a certificate".to_string(),
		));
	};
	Ok(der.to_vec())
}

fn read_pem_private_key(mut pem: &[u8]) -> Result<RsaPrivateKey, CaError> {
	let mut reader = std::io::BufReader::new(Cursor::new(&mut pem));
	let parsed = rustls_pemfile::read_one(&mut reader)
		.map_err(|e| CaError::InvalidCaMaterial(e.to_string()))?
		.ok_or_else(|| CaError::InvalidCaMaterial("no private key in CA pem".to_string()))?;
	match parsed {
		Item::Pkcs1Key(key) => RsaPrivateKey::from_pkcs1_der(key.secret_pkcs1_der())
			.map_err(|e| CaError::InvalidCaMaterial(format!("CA private key: {e}"))),
		Item::Pkcs8Key(key) => RsaPrivateKey::from_pkcs8_der(key.secret_pkcs8_der())
			.map_err(|e| CaError::InvalidCaMaterial(format!("CA private key: {e}"))),
		_ => Err(CaError::InvalidCaMaterial(
			"CA private key must be a standalone PEM private key".to_string(),
		)),
	}
}
