use envkey_crypto::CryptoError;
use thiserror::Error;

/// Everything that can go wrong between the raw ENVKEY string and the final
/// JSON output. The display strings are part of the CLI contract: existing
/// callers parse `error: ENVKEY invalid` from stdout, so the credential
/// variants deliberately collapse to the same opaque message rather than
/// revealing which layer rejected the key.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Fewer than two `-`-separated pieces in the credential string.
    #[error("ENVKEY invalid")]
    CredentialMalformed,

    /// The server returned 404, or the fetched payload failed decryption or
    /// signature verification.
    #[error("ENVKEY invalid")]
    CredentialInvalid,

    /// Primary, backups, and cache all failed. The message carries the
    /// accumulated per-tier errors.
    #[error("{0}")]
    NetworkExhausted(String),

    /// A signer could not be chained back to the creator-trusted set.
    #[error("{0}")]
    TrustViolation(String),

    /// Missing required fields, inconsistent inheritance fields, or a body
    /// that is not the JSON the envelope schema promises.
    #[error("{0}")]
    EnvelopeInvalid(String),

    /// An indirect payload pointer could not be resolved.
    #[error("environment pointer url could not be loaded: {0}")]
    IndirectFetchFailed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
