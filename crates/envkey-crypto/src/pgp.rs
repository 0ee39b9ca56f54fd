//! rPGP-backed implementation of [`CryptoSuite`].
//!
//! All contact with the `pgp` crate lives in this module. The rest of the
//! workspace only sees the trait and the opaque [`PgpKeyRing`].

use std::io::Cursor;

use pgp::composed::cleartext::CleartextSignedMessage;
use pgp::composed::{Deserializable, Message, SignedPublicKey, SignedSecretKey};
use pgp::crypto::hash::HashAlgorithm;
use pgp::types::{KeyTrait, PublicKeyTrait, SecretKeyTrait, Tag};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::suite::CryptoSuite;

/// Fixed message for the keypair sign/verify self-check.
const PAIR_CHECK_MESSAGE: &[u8] = b"envkey keypair check";

/// Parsed OpenPGP key material. Secret keys stay in their encrypted packet
/// form; the unlocking passphrase rides along for decrypt operations and is
/// zeroized on drop.
#[derive(Clone)]
pub struct PgpKeyRing {
    public: Vec<SignedPublicKey>,
    secret: Vec<SignedSecretKey>,
    passphrase: Option<Zeroizing<String>>,
}

impl PgpKeyRing {
    fn empty() -> Self {
        Self {
            public: Vec::new(),
            secret: Vec::new(),
            passphrase: None,
        }
    }

    fn passphrase(&self) -> String {
        self.passphrase
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default()
    }
}

/// The rPGP backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pgp;

impl CryptoSuite for Pgp {
    type KeyRing = PgpKeyRing;

    fn read_armored_public_key(&self, armored: &[u8]) -> Result<PgpKeyRing, CryptoError> {
        let (key, _headers) = SignedPublicKey::from_armor_single(Cursor::new(armored))
            .map_err(|e| CryptoError::Armor(e.to_string()))?;
        Ok(PgpKeyRing {
            public: vec![key],
            secret: Vec::new(),
            passphrase: None,
        })
    }

    fn read_armored_private_key(
        &self,
        armored: &[u8],
        passphrase: &str,
    ) -> Result<PgpKeyRing, CryptoError> {
        let (key, _headers) = SignedSecretKey::from_armor_single(Cursor::new(armored))
            .map_err(|e| CryptoError::Armor(e.to_string()))?;
        // Unlock now so a wrong passphrase fails before any message is read.
        key.unlock(|| passphrase.to_string(), |_unlocked| Ok(()))
            .map_err(|_| CryptoError::PrivateKeyDecrypt)?;
        Ok(PgpKeyRing {
            public: Vec::new(),
            secret: vec![key],
            passphrase: Some(Zeroizing::new(passphrase.to_string())),
        })
    }

    fn verify_public_matches_private(
        &self,
        public: &PgpKeyRing,
        private: &PgpKeyRing,
    ) -> Result<(), CryptoError> {
        let public_key = public.public.first().ok_or(CryptoError::EmptyRing)?;
        let secret_key = private.secret.first().ok_or(CryptoError::EmptyRing)?;

        let digest = Sha256::digest(PAIR_CHECK_MESSAGE);
        let signature = secret_key
            .create_signature(|| private.passphrase(), HashAlgorithm::SHA2_256, &digest)
            .map_err(|_| CryptoError::KeyPairMismatch)?;
        public_key
            .verify_signature(HashAlgorithm::SHA2_256, &digest, &signature)
            .map_err(|_| CryptoError::KeyPairMismatch)
    }

    fn verify_armored_key_signed_by(
        &self,
        signed: &[u8],
        signer: &[u8],
    ) -> Result<(), CryptoError> {
        let subject = self.read_armored_public_key(signed)?;
        let signer = self.read_armored_public_key(signer)?;
        let subject = &subject.public[0];
        let signer = &signer.public[0];

        let signer_id = signer.key_id();
        for user in &subject.details.users {
            for sig in &user.signatures {
                let issued_by_signer = sig
                    .issuer()
                    .into_iter()
                    .any(|issuer| *issuer == signer_id);
                if !issued_by_signer {
                    continue;
                }
                if sig
                    .verify_third_party_certification(
                        &signer.primary_key,
                        &subject.primary_key,
                        Tag::UserId,
                        &user.id,
                    )
                    .is_ok()
                {
                    return Ok(());
                }
            }
        }
        Err(CryptoError::BadSignature)
    }

    fn verify_cleartext_signed(
        &self,
        document: &[u8],
        signer: &PgpKeyRing,
    ) -> Result<Vec<u8>, CryptoError> {
        let text = std::str::from_utf8(document)
            .map_err(|e| CryptoError::Armor(e.to_string()))?;
        let (message, _headers) = CleartextSignedMessage::from_string(text)
            .map_err(|e| CryptoError::Armor(e.to_string()))?;

        for key in &signer.public {
            if message.verify(key).is_ok() {
                return Ok(message.signed_text().into_bytes());
            }
        }
        Err(CryptoError::BadSignature)
    }

    fn decrypt_and_verify(
        &self,
        armored_message: &[u8],
        ring: &PgpKeyRing,
    ) -> Result<Vec<u8>, CryptoError> {
        if ring.secret.is_empty() || ring.public.is_empty() {
            return Err(CryptoError::EmptyRing);
        }
        let (message, _headers) = Message::from_armor_single(Cursor::new(armored_message))
            .map_err(|e| CryptoError::Armor(e.to_string()))?;

        let decryptors: Vec<&SignedSecretKey> = ring.secret.iter().collect();
        let (decrypted, _key_ids) = message
            .decrypt(|| ring.passphrase(), &decryptors)
            .map_err(|_| CryptoError::DecryptOrVerify)?;
        let decrypted = decrypted
            .decompress()
            .map_err(|_| CryptoError::DecryptOrVerify)?;

        // The signature must verify against one of the ring's public keys
        // before any plaintext leaves this function.
        let verified = ring
            .public
            .iter()
            .any(|key| decrypted.verify(key).is_ok());
        if !verified {
            return Err(CryptoError::DecryptOrVerify);
        }

        decrypted
            .get_content()
            .map_err(|_| CryptoError::DecryptOrVerify)?
            .ok_or(CryptoError::DecryptOrVerify)
    }

    fn merge(&self, left: &PgpKeyRing, right: &PgpKeyRing) -> PgpKeyRing {
        let mut merged = PgpKeyRing::empty();
        merged.public.extend(left.public.iter().cloned());
        merged.public.extend(right.public.iter().cloned());
        merged.secret.extend(left.secret.iter().cloned());
        merged.secret.extend(right.secret.iter().cloned());
        merged.passphrase = left
            .passphrase
            .clone()
            .or_else(|| right.passphrase.clone());
        merged
    }

    fn fingerprint(&self, ring: &PgpKeyRing) -> Result<Vec<u8>, CryptoError> {
        if let Some(key) = ring.public.first() {
            return Ok(key.fingerprint());
        }
        if let Some(key) = ring.secret.first() {
            return Ok(key.fingerprint());
        }
        Err(CryptoError::EmptyRing)
    }
}
