use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("could not read armored key: {0}")]
    Armor(String),

    #[error("could not decrypt private key")]
    PrivateKeyDecrypt,

    #[error("public key does not match private key")]
    KeyPairMismatch,

    #[error("signature verification failed")]
    BadSignature,

    #[error("message could not be decrypted and verified")]
    DecryptOrVerify,

    #[error("keyring is empty")]
    EmptyRing,

    #[error("openpgp error: {0}")]
    Pgp(#[from] pgp::errors::Error),
}
