//! Deterministic stand-in for the OpenPGP backend, so trust and parser
//! logic can be exercised without key fixtures.
//!
//! Fixture grammar:
//! - public key:  `PUB:<name>[;FPR:<fp>][;SIGNEDBY:<a>,<b>]`
//! - private key: `PRIV:<name>;PASS:<passphrase>`
//! - cleartext:   `CLEARTEXT:<signer-name>\n<payload>`
//! - message:     `ENC[to=<name>,by=<signer-name>]<plaintext>`
//!
//! "Signed by" is literal: a key is certified by exactly the names listed in
//! its own SIGNEDBY clause.

use envkey_crypto::{CryptoError, CryptoSuite};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubKey {
    pub name: String,
    pub fingerprint: String,
    pub signed_by: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StubRing {
    pub public: Vec<StubKey>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StubSuite;

fn parse_public(armored: &[u8]) -> Result<StubKey, CryptoError> {
    let text = std::str::from_utf8(armored)
        .map_err(|_| CryptoError::Armor("not utf-8".to_string()))?;
    let rest = text
        .strip_prefix("PUB:")
        .ok_or_else(|| CryptoError::Armor(format!("not a stub public key: {text}")))?;

    let mut parts = rest.split(';');
    let name = parts.next().unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(CryptoError::Armor("empty key name".to_string()));
    }
    let mut fingerprint = name.clone();
    let mut signed_by = Vec::new();
    for part in parts {
        if let Some(fp) = part.strip_prefix("FPR:") {
            fingerprint = fp.to_string();
        } else if let Some(list) = part.strip_prefix("SIGNEDBY:") {
            signed_by = list.split(',').map(str::to_string).collect();
        }
    }
    Ok(StubKey {
        name,
        fingerprint,
        signed_by,
    })
}

impl CryptoSuite for StubSuite {
    type KeyRing = StubRing;

    fn read_armored_public_key(&self, armored: &[u8]) -> Result<StubRing, CryptoError> {
        Ok(StubRing {
            public: vec![parse_public(armored)?],
            secret: None,
        })
    }

    fn read_armored_private_key(
        &self,
        armored: &[u8],
        passphrase: &str,
    ) -> Result<StubRing, CryptoError> {
        let text = std::str::from_utf8(armored)
            .map_err(|_| CryptoError::Armor("not utf-8".to_string()))?;
        let rest = text
            .strip_prefix("PRIV:")
            .ok_or_else(|| CryptoError::Armor(format!("not a stub private key: {text}")))?;
        let (name, pass) = rest
            .split_once(";PASS:")
            .ok_or_else(|| CryptoError::Armor("missing passphrase clause".to_string()))?;
        if pass != passphrase {
            return Err(CryptoError::PrivateKeyDecrypt);
        }
        Ok(StubRing {
            public: Vec::new(),
            secret: Some(name.to_string()),
        })
    }

    fn verify_public_matches_private(
        &self,
        public: &StubRing,
        private: &StubRing,
    ) -> Result<(), CryptoError> {
        let public_name = &public.public.first().ok_or(CryptoError::EmptyRing)?.name;
        let secret_name = private.secret.as_ref().ok_or(CryptoError::EmptyRing)?;
        if public_name == secret_name {
            Ok(())
        } else {
            Err(CryptoError::KeyPairMismatch)
        }
    }

    fn verify_armored_key_signed_by(
        &self,
        signed: &[u8],
        signer: &[u8],
    ) -> Result<(), CryptoError> {
        let subject = parse_public(signed)?;
        let signer = parse_public(signer)?;
        if subject.signed_by.contains(&signer.name) {
            Ok(())
        } else {
            Err(CryptoError::BadSignature)
        }
    }

    fn verify_cleartext_signed(
        &self,
        document: &[u8],
        signer: &StubRing,
    ) -> Result<Vec<u8>, CryptoError> {
        let text = std::str::from_utf8(document)
            .map_err(|_| CryptoError::Armor("not utf-8".to_string()))?;
        let rest = text
            .strip_prefix("CLEARTEXT:")
            .ok_or_else(|| CryptoError::Armor("not a stub cleartext".to_string()))?;
        let (name, payload) = rest
            .split_once('\n')
            .ok_or_else(|| CryptoError::Armor("missing cleartext body".to_string()))?;
        if signer.public.iter().any(|key| key.name == name) {
            Ok(payload.as_bytes().to_vec())
        } else {
            Err(CryptoError::BadSignature)
        }
    }

    fn decrypt_and_verify(
        &self,
        armored_message: &[u8],
        ring: &StubRing,
    ) -> Result<Vec<u8>, CryptoError> {
        let text = std::str::from_utf8(armored_message)
            .map_err(|_| CryptoError::Armor("not utf-8".to_string()))?;
        let rest = text
            .strip_prefix("ENC[to=")
            .ok_or(CryptoError::DecryptOrVerify)?;
        let (to, rest) = rest.split_once(",by=").ok_or(CryptoError::DecryptOrVerify)?;
        let (by, plaintext) = rest.split_once(']').ok_or(CryptoError::DecryptOrVerify)?;

        if ring.secret.as_deref() != Some(to) {
            return Err(CryptoError::DecryptOrVerify);
        }
        if !ring.public.iter().any(|key| key.name == by) {
            return Err(CryptoError::DecryptOrVerify);
        }
        Ok(plaintext.as_bytes().to_vec())
    }

    fn merge(&self, left: &StubRing, right: &StubRing) -> StubRing {
        let mut public = left.public.clone();
        public.extend(right.public.iter().cloned());
        StubRing {
            public,
            secret: left.secret.clone().or_else(|| right.secret.clone()),
        }
    }

    fn fingerprint(&self, ring: &StubRing) -> Result<Vec<u8>, CryptoError> {
        if let Some(key) = ring.public.first() {
            return Ok(key.fingerprint.as_bytes().to_vec());
        }
        if let Some(name) = &ring.secret {
            return Ok(name.as_bytes().to_vec());
        }
        Err(CryptoError::EmptyRing)
    }
}

pub fn pub_key(name: &str) -> String {
    format!("PUB:{name}")
}

pub fn pub_key_signed_by(name: &str, signers: &[&str]) -> String {
    format!("PUB:{name};SIGNEDBY:{}", signers.join(","))
}

pub fn priv_key(name: &str, passphrase: &str) -> String {
    format!("PRIV:{name};PASS:{passphrase}")
}

pub fn cleartext(signer: &str, payload: &str) -> String {
    format!("CLEARTEXT:{signer}\n{payload}")
}

pub fn message(to: &str, by: &str, plaintext: &str) -> String {
    format!("ENC[to={to},by={by}]{plaintext}")
}

/// A complete envelope over stub key material: the credential `AAAA-BBBB`,
/// creator key `creator`, and env signer `signer1` listed directly in the
/// creator-trusted map.
pub fn stub_envelope() -> crate::envelope::Envelope {
    crate::envelope::Envelope {
        env: message("creator", "signer1", r#"{"TEST":"it","TEST_2":"works!"}"#),
        encrypted_privkey: priv_key("creator", "BBBB"),
        pubkey: pub_key("creator"),
        signed_trusted_pubkeys: cleartext(
            "creator",
            &serde_json::json!({"env-signer": {"pubkey": pub_key("signer1")}}).to_string(),
        ),
        signed_by_id: "env-signer".to_string(),
        signed_by_pubkey: pub_key("signer1"),
        signed_by_trusted_pubkeys: cleartext("signer1", "{}"),
        ..crate::envelope::Envelope::default()
    }
}

/// Same, plus inheritance overrides signed by a second creator-trusted key.
pub fn stub_envelope_with_overrides() -> crate::envelope::Envelope {
    let mut envelope = stub_envelope();
    envelope.env = message("creator", "signer1", r#"{"A":"1","B":"2"}"#);
    envelope.signed_trusted_pubkeys = cleartext(
        "creator",
        &serde_json::json!({
            "env-signer": {"pubkey": pub_key("signer1")},
            "overrides-signer": {"pubkey": pub_key("signer2")},
        })
        .to_string(),
    );
    envelope.inheritance_overrides = message("creator", "signer2", r#"{"B":"override","C":"3"}"#);
    envelope.inheritance_overrides_signed_by_id = "overrides-signer".to_string();
    envelope.inheritance_overrides_signed_by_pubkey = pub_key("signer2");
    envelope.inheritance_overrides_signed_by_trusted_pubkeys = cleartext("signer2", "{}");
    envelope
}

/// Minimal HTTP/1.1 responder bound to a random localhost port. The handler
/// maps a request path to `(status, body)`. Returns `localhost:<port>`.
pub async fn spawn_http_server<F>(handler: F) -> String
where
    F: Fn(String) -> (u16, String) + Send + Sync + 'static,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let Ok(n) = socket.read(&mut chunk).await else {
                    break;
                };
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&chunk[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let path = String::from_utf8_lossy(&head)
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or("/")
                .to_string();
            let (status, body) = handler(path);
            let reason = match status {
                200 => "OK",
                404 => "Not Found",
                500 => "Internal Server Error",
                503 => "Service Unavailable",
                _ => "Unknown",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("localhost:{port}")
}

/// A server that accepts connections but never responds; requests against
/// it only ever finish by cancellation or timeout.
pub async fn spawn_black_hole() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("localhost:{port}")
}

/// A localhost address with nothing listening on it.
pub async fn unused_addr() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("localhost:{port}")
}
