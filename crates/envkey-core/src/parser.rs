//! Envelope verification and decryption.
//!
//! The pipeline runs in fixed stages: validate the envelope, extract and
//! cross-check key material, materialize the signed trusted maps, prove the
//! signers trusted, decrypt the bodies, resolve indirect pointers, and merge
//! inheritance overrides into the final environment.

use envkey_crypto::CryptoSuite;
use serde_json::{Map, Value};
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::FetchError;
use crate::http::HttpHandle;
use crate::trust::{Signer, SignerRole, TrustChain, TrustedMap};

/// Key material extracted from one envelope. The signer rings pair the
/// credential's decrypted private key with the pubkey expected to have
/// signed the corresponding body, which is exactly what
/// `decrypt_and_verify` consumes.
struct ExtractedKeys<C: CryptoSuite> {
    creator_pubkey: C::KeyRing,
    env_signer: Signer<C>,
    overrides_signer: Option<Signer<C>>,
    signer_ring: C::KeyRing,
    overrides_ring: Option<C::KeyRing>,
}

/// Verify and decrypt an envelope into the final environment JSON.
pub async fn parse<C: CryptoSuite>(
    suite: &C,
    http: &HttpHandle,
    envelope: &Envelope,
    passphrase: &str,
) -> Result<String, FetchError> {
    envelope.validate()?;

    let keys = extract_keys(suite, envelope, passphrase)?;
    let chain = extract_trust_chain(suite, envelope, &keys)?;

    chain.verify_signer_trusted(suite, &keys.env_signer)?;
    if let Some(overrides_signer) = &keys.overrides_signer {
        chain.verify_signer_trusted(suite, overrides_signer)?;
    }

    let env_bytes = decrypt_body(suite, http, &envelope.env, &keys.signer_ring).await?;

    if let Some(overrides_ring) = &keys.overrides_ring {
        let overrides_bytes = decrypt_body(
            suite,
            http,
            &envelope.inheritance_overrides,
            overrides_ring,
        )
        .await?;
        merge_overrides(&env_bytes, &overrides_bytes)
    } else {
        // The server is responsible for the body being valid JSON; pass it
        // through verbatim.
        String::from_utf8(env_bytes)
            .map_err(|_| FetchError::EnvelopeInvalid("environment body is not utf-8".to_string()))
    }
}

fn extract_keys<C: CryptoSuite>(
    suite: &C,
    envelope: &Envelope,
    passphrase: &str,
) -> Result<ExtractedKeys<C>, FetchError> {
    let privkey = suite.read_armored_private_key(envelope.encrypted_privkey.as_bytes(), passphrase)?;
    let creator_pubkey = suite.read_armored_public_key(envelope.pubkey.as_bytes())?;

    // Fail on a mismatched keypair before anything touches the body.
    suite.verify_public_matches_private(&creator_pubkey, &privkey)?;

    let env_signer = Signer::new(
        suite,
        &envelope.signed_by_id,
        &envelope.signed_by_pubkey,
        SignerRole::Env,
    )?;
    let signer_ring = suite.merge(&privkey, &env_signer.pubkey);

    let (overrides_signer, overrides_ring) = if envelope.has_inheritance_overrides() {
        let signer = Signer::new(
            suite,
            &envelope.inheritance_overrides_signed_by_id,
            &envelope.inheritance_overrides_signed_by_pubkey,
            SignerRole::Overrides,
        )?;
        let ring = suite.merge(&privkey, &signer.pubkey);
        (Some(signer), Some(ring))
    } else {
        (None, None)
    };

    Ok(ExtractedKeys {
        creator_pubkey,
        env_signer,
        overrides_signer,
        signer_ring,
        overrides_ring,
    })
}

fn extract_trust_chain<C: CryptoSuite>(
    suite: &C,
    envelope: &Envelope,
    keys: &ExtractedKeys<C>,
) -> Result<TrustChain, FetchError> {
    let creator_trusted = parse_trusted_map(
        suite,
        &envelope.signed_trusted_pubkeys,
        &keys.creator_pubkey,
    )?;
    let signer_trusted = parse_trusted_map(
        suite,
        &envelope.signed_by_trusted_pubkeys,
        &keys.env_signer.pubkey,
    )?;
    let overrides_trusted = match &keys.overrides_signer {
        Some(signer) => Some(parse_trusted_map(
            suite,
            &envelope.inheritance_overrides_signed_by_trusted_pubkeys,
            &signer.pubkey,
        )?),
        None => None,
    };

    Ok(TrustChain {
        creator_trusted,
        signer_trusted,
        overrides_trusted,
    })
}

/// A trusted map only exists once its cleartext signature verifies against
/// the declared signer key.
fn parse_trusted_map<C: CryptoSuite>(
    suite: &C,
    signed_document: &str,
    signer: &C::KeyRing,
) -> Result<TrustedMap, FetchError> {
    let plaintext = suite
        .verify_cleartext_signed(signed_document.as_bytes(), signer)
        .map_err(|_| {
            FetchError::TrustViolation("trusted keys signature invalid".to_string())
        })?;
    serde_json::from_slice(&plaintext).map_err(|e| {
        FetchError::EnvelopeInvalid(format!("trusted keys document is not valid JSON: {e}"))
    })
}

/// Decrypt one body, following an indirect pointer at most once. A
/// decrypted body whose first byte is `"` is a JSON-encoded URL naming the
/// actual ciphertext; the fetched replacement is decrypted with the same
/// ring and returned as-is even if it is itself quoted.
async fn decrypt_body<C: CryptoSuite>(
    suite: &C,
    http: &HttpHandle,
    ciphertext: &str,
    ring: &C::KeyRing,
) -> Result<Vec<u8>, FetchError> {
    let plaintext = suite.decrypt_and_verify(ciphertext.as_bytes(), ring)?;

    if plaintext.first() != Some(&b'"') {
        return Ok(plaintext);
    }

    let url: String = serde_json::from_slice(&plaintext).map_err(|e| {
        FetchError::EnvelopeInvalid(format!("indirect pointer is not a JSON string: {e}"))
    })?;
    debug!(%url, "dereferencing indirect payload pointer");
    let fetched = http.get_indirect(&url).await?;
    suite.decrypt_and_verify(&fetched, ring).map_err(Into::into)
}

fn merge_overrides(env_bytes: &[u8], overrides_bytes: &[u8]) -> Result<String, FetchError> {
    let mut env: Map<String, Value> = serde_json::from_slice(env_bytes)
        .map_err(|e| FetchError::EnvelopeInvalid(format!("environment is not a JSON object: {e}")))?;
    let overrides: Map<String, Value> = serde_json::from_slice(overrides_bytes).map_err(|e| {
        FetchError::EnvelopeInvalid(format!("inheritance overrides are not a JSON object: {e}"))
    })?;

    for (key, value) in overrides {
        env.insert(key, value);
    }
    serde_json::to_string(&env)
        .map_err(|e| FetchError::EnvelopeInvalid(format!("could not serialize environment: {e}")))
}
