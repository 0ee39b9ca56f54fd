//! Web-of-trust validation.
//!
//! A signer is trusted either directly (present in the creator-trusted map
//! with a matching fingerprint) or transitively, by walking `invitedById`
//! edges until the chain terminates at a creator-trusted entry. Every hop
//! requires two certifications: the subject's invite key signed by the
//! inviter's pubkey, and the subject's pubkey signed by its own invite key.

use std::collections::{HashMap, HashSet};

use envkey_crypto::CryptoSuite;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Which trusted pool a signer may legally chain through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerRole {
    Env,
    Overrides,
}

/// A declared signer: identifier plus parsed and armored forms of its key.
pub struct Signer<C: CryptoSuite> {
    pub id: String,
    pub armored_pubkey: String,
    pub pubkey: C::KeyRing,
    pub role: SignerRole,
}

impl<C: CryptoSuite> Signer<C> {
    pub fn new(
        suite: &C,
        id: &str,
        armored_pubkey: &str,
        role: SignerRole,
    ) -> Result<Self, FetchError> {
        let pubkey = suite.read_armored_public_key(armored_pubkey.as_bytes())?;
        Ok(Self {
            id: id.to_string(),
            armored_pubkey: armored_pubkey.to_string(),
            pubkey,
            role,
        })
    }
}

/// A user or device in a trusted map: a public key and, when onboarded via
/// invitation, the transient invite key plus the inviter's identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustedKeyable {
    pub pubkey: String,
    #[serde(rename = "invitePubkey", default)]
    pub invite_pubkey: String,
    #[serde(rename = "invitedById", default)]
    pub invited_by_id: String,
}

impl TrustedKeyable {
    /// The two mandatory certification checks binding this keyable to its
    /// inviter: the invite key must be signed by the inviter's pubkey, and
    /// this keyable's pubkey must be signed by the invite key.
    pub fn verify_inviter<C: CryptoSuite>(
        &self,
        suite: &C,
        inviter: &TrustedKeyable,
    ) -> Result<(), FetchError> {
        suite
            .verify_armored_key_signed_by(
                self.invite_pubkey.as_bytes(),
                inviter.pubkey.as_bytes(),
            )
            .map_err(|_| {
                FetchError::TrustViolation("invite key not signed by inviter".to_string())
            })?;

        suite
            .verify_armored_key_signed_by(self.pubkey.as_bytes(), self.invite_pubkey.as_bytes())
            .map_err(|_| {
                FetchError::TrustViolation("pubkey not signed by invite key".to_string())
            })
    }
}

/// Identifier → keyable, decoded from a verified cleartext-signed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustedMap(pub HashMap<String, TrustedKeyable>);

impl TrustedMap {
    /// Look the signer up by id and fingerprint-match the entry against the
    /// signer's parsed key. `Ok(None)` means not present; a fingerprint
    /// mismatch is a hard failure.
    pub fn locate<C: CryptoSuite>(
        &self,
        suite: &C,
        signer: &Signer<C>,
    ) -> Result<Option<TrustedKeyable>, FetchError> {
        let Some(entry) = self.0.get(&signer.id) else {
            return Ok(None);
        };

        let entry_ring = suite.read_armored_public_key(entry.pubkey.as_bytes())?;
        let entry_fingerprint = suite.fingerprint(&entry_ring)?;
        let signer_fingerprint = suite.fingerprint(&signer.pubkey)?;
        if entry_fingerprint == signer_fingerprint {
            Ok(Some(entry.clone()))
        } else {
            Err(FetchError::TrustViolation(format!(
                "signer pubkey fingerprint {} does not match trusted pubkey fingerprint {}",
                hex::encode(&signer_fingerprint),
                hex::encode(&entry_fingerprint),
            )))
        }
    }

    /// Walk `invitedById` edges from `subject` until an inviter is found in
    /// `creator_trusted`. Intermediate inviters are resolved in this map.
    /// Returns the keyables verified along the way; callers treat the walk
    /// as a pure yes/no and never consume the list.
    pub fn trusted_root<C: CryptoSuite>(
        &self,
        suite: &C,
        subject: &TrustedKeyable,
        creator_trusted: &TrustedMap,
    ) -> Result<Vec<TrustedKeyable>, FetchError> {
        let mut newly_verified = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = subject.clone();

        loop {
            if current.invited_by_id.is_empty() {
                return Err(FetchError::TrustViolation(
                    "keyable has no inviter id".to_string(),
                ));
            }
            if !visited.insert(current.invited_by_id.clone()) {
                return Err(FetchError::TrustViolation(format!(
                    "invitation chain repeats id {}",
                    current.invited_by_id
                )));
            }

            let (inviter, at_root) = match creator_trusted.0.get(&current.invited_by_id) {
                Some(inviter) => (inviter.clone(), true),
                None => match self.0.get(&current.invited_by_id) {
                    Some(inviter) => (inviter.clone(), false),
                    None => {
                        return Err(FetchError::TrustViolation(
                            "no trusted root".to_string(),
                        ));
                    }
                },
            };

            current.verify_inviter(suite, &inviter)?;
            newly_verified.push(current);

            if at_root {
                return Ok(newly_verified);
            }
            current = inviter;
        }
    }
}

/// The three trusted maps of one envelope. `creator_trusted` is the root of
/// trust; the other two are the pools signers may chain through.
pub struct TrustChain {
    pub creator_trusted: TrustedMap,
    pub signer_trusted: TrustedMap,
    pub overrides_trusted: Option<TrustedMap>,
}

impl TrustChain {
    pub fn verify_signer_trusted<C: CryptoSuite>(
        &self,
        suite: &C,
        signer: &Signer<C>,
    ) -> Result<(), FetchError> {
        self.signer_keyable(suite, signer).map(|_| ())
    }

    /// Resolve the signer to a trusted keyable, chaining through the pool
    /// matching its role when it is not directly creator-trusted.
    pub fn signer_keyable<C: CryptoSuite>(
        &self,
        suite: &C,
        signer: &Signer<C>,
    ) -> Result<(TrustedKeyable, Vec<TrustedKeyable>), FetchError> {
        if let Some(trusted) = self.creator_trusted.locate(suite, signer)? {
            return Ok((trusted, Vec::new()));
        }

        let pool = match signer.role {
            SignerRole::Overrides => self.overrides_trusted.as_ref().ok_or_else(|| {
                FetchError::TrustViolation("inheritance overrides signer not trusted".to_string())
            })?,
            SignerRole::Env => &self.signer_trusted,
        };

        let trusted = pool
            .locate(suite, signer)?
            .ok_or_else(|| FetchError::TrustViolation("signer not trusted".to_string()))?;

        let newly_verified = pool.trusted_root(suite, &trusted, &self.creator_trusted)?;
        Ok((trusted, newly_verified))
    }
}
