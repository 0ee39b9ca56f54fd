//! The seam between the verification pipeline and an OpenPGP backend.
//!
//! Everything the pipeline needs from OpenPGP fits in eight operations over
//! an opaque keyring type. Implementations must treat `decrypt_and_verify`
//! as atomic: no plaintext is ever returned without a verified signature.

use crate::error::CryptoError;

pub trait CryptoSuite {
    /// A bundle of parsed key material. May hold public keys, private keys,
    /// or both; `merge` combines two rings into one.
    type KeyRing: Clone + Send + Sync;

    /// Parse an armored public key.
    fn read_armored_public_key(&self, armored: &[u8]) -> Result<Self::KeyRing, CryptoError>;

    /// Parse an armored, passphrase-encrypted private key and unlock it.
    /// A wrong passphrase fails here, before any message is touched.
    fn read_armored_private_key(
        &self,
        armored: &[u8],
        passphrase: &str,
    ) -> Result<Self::KeyRing, CryptoError>;

    /// Check that `public` and `private` form a pair, via a sign/verify
    /// round-trip over a fixed message.
    fn verify_public_matches_private(
        &self,
        public: &Self::KeyRing,
        private: &Self::KeyRing,
    ) -> Result<(), CryptoError>;

    /// Check that the armored key `signed` carries a valid certification
    /// issued by the armored key `signer`.
    fn verify_armored_key_signed_by(
        &self,
        signed: &[u8],
        signer: &[u8],
    ) -> Result<(), CryptoError>;

    /// Verify a cleartext-signed document against `signer` and return the
    /// embedded plaintext.
    fn verify_cleartext_signed(
        &self,
        document: &[u8],
        signer: &Self::KeyRing,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt an armored message with the private key in `ring` and verify
    /// its signature against a public key in `ring`, in one operation.
    fn decrypt_and_verify(
        &self,
        armored_message: &[u8],
        ring: &Self::KeyRing,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Combine two keyrings.
    fn merge(&self, left: &Self::KeyRing, right: &Self::KeyRing) -> Self::KeyRing;

    /// Primary-key fingerprint of the first key in the ring.
    fn fingerprint(&self, ring: &Self::KeyRing) -> Result<Vec<u8>, CryptoError>;
}
