//! The server response: armored ciphertexts, signer identities, and the
//! cleartext-signed trusted-key documents. Field names are fixed by the wire
//! format; absent inheritance fields deserialize to empty strings.

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Envelope {
    /// Armored encrypted+signed environment body, or (once decrypted) an
    /// indirect URL pointer.
    pub env: String,

    /// Armored passphrase-encrypted private key of the credential.
    pub encrypted_privkey: String,

    /// Armored public key paired with `encrypted_privkey` (the creator key).
    pub pubkey: String,

    /// Cleartext-signed JSON, signed by the creator key: the creator-trusted
    /// map that roots every trust chain.
    pub signed_trusted_pubkeys: String,

    /// Identifier of the environment signer.
    pub signed_by_id: String,

    /// Armored public key of the environment signer.
    pub signed_by_pubkey: String,

    /// Cleartext-signed JSON, signed by the environment signer.
    pub signed_by_trusted_pubkeys: String,

    #[serde(default)]
    pub inheritance_overrides: String,

    #[serde(default)]
    pub inheritance_overrides_signed_by_id: String,

    #[serde(default)]
    pub inheritance_overrides_signed_by_pubkey: String,

    #[serde(default)]
    pub inheritance_overrides_signed_by_trusted_pubkeys: String,

    /// Server permission to persist this envelope to the local disk cache.
    #[serde(default)]
    pub allow_caching: bool,
}

impl Envelope {
    /// An envelope is complete iff the seven required fields are non-empty
    /// and the inheritance fields are all-or-none.
    pub fn validate(&self) -> Result<(), FetchError> {
        let required_present = !self.env.is_empty()
            && !self.encrypted_privkey.is_empty()
            && !self.pubkey.is_empty()
            && !self.signed_trusted_pubkeys.is_empty()
            && !self.signed_by_id.is_empty()
            && !self.signed_by_pubkey.is_empty()
            && !self.signed_by_trusted_pubkeys.is_empty();

        if !required_present {
            return Err(FetchError::EnvelopeInvalid(
                "required fields are empty".to_string(),
            ));
        }

        let has_any_inheritance = !self.inheritance_overrides.is_empty()
            || !self.inheritance_overrides_signed_by_id.is_empty()
            || !self.inheritance_overrides_signed_by_pubkey.is_empty()
            || !self.inheritance_overrides_signed_by_trusted_pubkeys.is_empty();

        if has_any_inheritance && !self.has_inheritance_overrides() {
            return Err(FetchError::EnvelopeInvalid(
                "invalid inheritance override fields".to_string(),
            ));
        }

        Ok(())
    }

    pub fn has_inheritance_overrides(&self) -> bool {
        !self.inheritance_overrides.is_empty()
            && !self.inheritance_overrides_signed_by_id.is_empty()
            && !self.inheritance_overrides_signed_by_pubkey.is_empty()
            && !self.inheritance_overrides_signed_by_trusted_pubkeys.is_empty()
    }
}
