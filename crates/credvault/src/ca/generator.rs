use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use der::asn1::{Ia5String, OctetString};
use der::flagset::FlagSet;
use der::{Decode, Encode};
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
	AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages,
	SubjectAltName, SubjectKeyIdentifier,
};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::{Time, Validity};

use crate::ca::material::{self, CaMaterial};
use crate::ca::signer;
use crate::ca::{
	CaCredential, CaError, CertificateParameters, Clock, ExtendedKeyUsageKind, KeyUsageBit,
	RandomSerialSource, SerialNumberSource, SystemClock,
};

#[cfg(test)]
#[path = "generator_tests.rs"]
mod tests;

/// An asymmetric key pair the new certificate certifies. Generation is the
/// caller's concern; the generator only consumes it.
#[derive(Clone)]
pub struct KeyPair {
	private: RsaPrivateKey,
	public: RsaPublicKey,
}

impl KeyPair {
	pub fn from_private(private: RsaPrivateKey) -> Self {
		let public = private.to_public_key();
		Self { private, public }
	}

	pub fn public(&self) -> &RsaPublicKey {
		&self.public
	}
}

impl fmt::Debug for KeyPair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeyPair").finish_non_exhaustive()
	}
}

/// Builds and signs X.509 v3 certificates, either self-signed over a fresh
/// key pair or issued by a stored CA credential. Pure computation: the
/// clock and serial randomness are injected, and no state is retained
/// between calls.
pub struct CertificateGenerator<C = SystemClock, R = RandomSerialSource> {
	clock: C,
	serials: R,
}

impl Default for CertificateGenerator {
	fn default() -> Self {
		Self::new(SystemClock, RandomSerialSource)
	}
}

impl<C: Clock, R: SerialNumberSource> CertificateGenerator<C, R> {
	pub fn new(clock: C, serials: R) -> Self {
		Self { clock, serials }
	}

	/// Self-signed certificate: issuer and subject are the same DN and the
	/// authority key identifier points back at the certificate itself.
	pub fn self_signed(
		&self,
		key_pair: &KeyPair,
		params: &CertificateParameters,
	) -> Result<Vec<u8>, CaError> {
		let subject = parse_subject(&params.subject)?;
		let spki = encode_spki(key_pair.public())?;
		let ski = key_identifier(&spki);
		let serial = self.next_serial()?;
		let issuer = Issuer {
			dn: subject.clone(),
			ski: ski.clone(),
			serial: serial.clone(),
			signing_key: key_pair.private.clone(),
		};
		self.build(subject, spki, ski, serial, issuer, params)
	}

	/// Certificate issued by a stored CA. The CA certificate and private
	/// key arrive PEM-encoded; see [`CaCredential`] for the accepted key
	/// formats.
	pub fn signed_by(
		&self,
		ca: &CaCredential,
		key_pair: &KeyPair,
		params: &CertificateParameters,
	) -> Result<Vec<u8>, CaError> {
		let CaMaterial {
			subject: ca_subject,
			ski: ca_ski,
			serial: ca_serial,
			signing_key,
		} = material::parse(ca)?;
		let ca_serial = SerialNumber::new(&ca_serial)
			.map_err(|e| CaError::InvalidCaMaterial(format!("CA serial: {e}")))?;
		let subject = parse_subject(&params.subject)?;
		let spki = encode_spki(key_pair.public())?;
		let ski = key_identifier(&spki);
		let serial = self.next_serial()?;
		let issuer = Issuer {
			dn: ca_subject,
			ski: ca_ski,
			serial: ca_serial,
			signing_key,
		};
		self.build(subject, spki, ski, serial, issuer, params)
	}

	fn next_serial(&self) -> Result<SerialNumber, CaError> {
		let mut bytes = self.serials.generate();
		// Clamp to a positive non-zero integer with no leading zero octet.
		bytes[0] = (bytes[0] & 0x7f).max(1);
		SerialNumber::new(&bytes)
			.map_err(|e| CaError::SigningFailure(format!("serial number: {e}")))
	}

	fn validity(&self, duration_days: u32) -> Result<Validity, CaError> {
		let not_before = self.clock.now();
		let not_after = not_before + Duration::from_secs(u64::from(duration_days) * 86_400);
		Ok(Validity {
			not_before: Time::try_from(not_before)
				.map_err(|e| CaError::InvalidParameters(format!("validity start: {e}")))?,
			not_after: Time::try_from(not_after)
				.map_err(|e| CaError::InvalidParameters(format!("validity end: {e}")))?,
		})
	}

	fn build(
		&self,
		subject: Name,
		spki: SubjectPublicKeyInfoOwned,
		ski: Vec<u8>,
		serial: SerialNumber,
		issuer: Issuer,
		params: &CertificateParameters,
	) -> Result<Vec<u8>, CaError> {
		let validity = self.validity(params.duration_days)?;
		let signer = signer::sha256_with_rsa(issuer.signing_key);
		let profile = Profile::Manual {
			issuer: Some(issuer.dn.clone()),
		};
		let mut builder =
			CertificateBuilder::new(profile, serial, validity, subject, spki, &signer)
				.map_err(sign_err)?;

		// The extension sequence is fixed: SKI, SAN, KU, EKU, AKI, BC.
		builder
			.add_extension(&SubjectKeyIdentifier(octets(&ski)?))
			.map_err(sign_err)?;
		if let Some(names) = &params.subject_alternative_names {
			builder
				.add_extension(&SubjectAltName(general_names(names)?))
				.map_err(sign_err)?;
		}
		if let Some(bits) = &params.key_usage {
			builder.add_extension(&key_usage(bits)).map_err(sign_err)?;
		}
		if let Some(purposes) = &params.extended_key_usage {
			builder
				.add_extension(&ExtendedKeyUsage(
					purposes.iter().map(eku_oid).collect(),
				))
				.map_err(sign_err)?;
		}
		builder
			.add_extension(&AuthorityKeyIdentifier {
				key_identifier: Some(octets(&issuer.ski)?),
				authority_cert_issuer: Some(vec![GeneralName::DirectoryName(issuer.dn)]),
				authority_cert_serial_number: Some(issuer.serial),
			})
			.map_err(sign_err)?;
		builder
			.add_extension(&BasicConstraints {
				ca: params.is_ca,
				path_len_constraint: None,
			})
			.map_err(sign_err)?;

		let certificate = builder
			.build::<rsa::pkcs1v15::Signature>()
			.map_err(sign_err)?;
		certificate
			.to_der()
			.map_err(|e| CaError::SigningFailure(e.to_string()))
	}
}

/// The issuing side of a certificate: its DN, the key identifier and
/// serial the AKI names, and the key that signs. For self-signed
/// certificates all of it refers to the certificate being built.
struct Issuer {
	dn: Name,
	ski: Vec<u8>,
	serial: SerialNumber,
	signing_key: RsaPrivateKey,
}

fn sign_err(e: x509_cert::builder::Error) -> CaError {
	CaError::SigningFailure(e.to_string())
}

fn parse_subject(subject: &str) -> Result<Name, CaError> {
	Name::from_str(subject)
		.map_err(|e| CaError::InvalidParameters(format!("subject {subject:?}: {e}")))
}

fn encode_spki(public: &RsaPublicKey) -> Result<SubjectPublicKeyInfoOwned, CaError> {
	let der = public
		.to_public_key_der()
		.map_err(|e| CaError::SigningFailure(format!("subject public key: {e}")))?;
	SubjectPublicKeyInfoOwned::from_der(der.as_bytes())
		.map_err(|e| CaError::SigningFailure(format!("subject public key: {e}")))
}

/// RFC 5280 method 1: the SHA-1 digest of the subject public key bits.
fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
	Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec()
}

fn octets(bytes: &[u8]) -> Result<OctetString, CaError> {
	OctetString::new(bytes).map_err(|e| CaError::SigningFailure(format!("extension encoding: {e}")))
}

fn general_names(names: &[String]) -> Result<Vec<GeneralName>, CaError> {
	names
		.iter()
		.map(|name| {
			Ia5String::new(name).map(GeneralName::DnsName).map_err(|e| {
				CaError::InvalidParameters(format!("subject alternative name {name:?}: {e}"))
			})
		})
		.collect()
}

fn key_usage(bits: &[KeyUsageBit]) -> KeyUsage {
	let mut flags: FlagSet<KeyUsages> = FlagSet::default();
	for bit in bits {
		flags |= match bit {
			KeyUsageBit::DigitalSignature => KeyUsages::DigitalSignature,
			KeyUsageBit::NonRepudiation => KeyUsages::NonRepudiation,
			KeyUsageBit::KeyEncipherment => KeyUsages::KeyEncipherment,
			KeyUsageBit::DataEncipherment => KeyUsages::DataEncipherment,
			KeyUsageBit::KeyAgreement => KeyUsages::KeyAgreement,
			KeyUsageBit::KeyCertSign => KeyUsages::KeyCertSign,
			KeyUsageBit::CrlSign => KeyUsages::CRLSign,
			KeyUsageBit::EncipherOnly => KeyUsages::EncipherOnly,
			KeyUsageBit::DecipherOnly => KeyUsages::DecipherOnly,
		};
	}
	KeyUsage(flags)
}

fn eku_oid(kind: &ExtendedKeyUsageKind) -> const_oid::ObjectIdentifier {
	use const_oid::db::rfc5280 as oids;
	match kind {
		ExtendedKeyUsageKind::ServerAuth => oids::ID_KP_SERVER_AUTH,
		ExtendedKeyUsageKind::ClientAuth => oids::ID_KP_CLIENT_AUTH,
		ExtendedKeyUsageKind::CodeSigning => oids::ID_KP_CODE_SIGNING,
		ExtendedKeyUsageKind::EmailProtection => oids::ID_KP_EMAIL_PROTECTION,
		ExtendedKeyUsageKind::TimeStamping => oids::ID_KP_TIME_STAMPING,
		ExtendedKeyUsageKind::OcspSigning => oids::ID_KP_OCSP_SIGNING,
	}
}
