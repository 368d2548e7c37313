use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use sha2::Sha256;

/// The content signer certificates are signed with. The signature
/// algorithm on the wire follows whatever this constructor produces;
/// changing algorithms means changing the signer built here.
pub(crate) type ContentSigner = SigningKey<Sha256>;

pub(crate) fn sha256_with_rsa(key: RsaPrivateKey) -> ContentSigner {
	SigningKey::new(key)
}
