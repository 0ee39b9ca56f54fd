use zeroize::Zeroizing;

use crate::error::FetchError;

/// A split ENVKEY: `<id>-<passphrase>-<host?>`.
///
/// The host suffix is everything after the second delimiter, rejoined
/// verbatim (it may itself contain `-`, e.g. `s3-eu-west-1…`). The
/// passphrase is zeroized on drop and never persisted.
pub struct Credential {
    pub id: String,
    pub passphrase: Zeroizing<String>,
    pub host: Option<String>,
}

impl Credential {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let pieces: Vec<&str> = raw.split('-').collect();
        if pieces.len() < 2 {
            return Err(FetchError::CredentialMalformed);
        }

        let host = if pieces.len() > 2 {
            let joined = pieces[2..].join("-");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        } else {
            None
        };

        Ok(Self {
            id: pieces[0].to_string(),
            passphrase: Zeroizing::new(pieces[1].to_string()),
            host,
        })
    }
}
