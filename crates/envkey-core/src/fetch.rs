//! The resilience pipeline: primary fetch with retries, backup race, disk
//! cache fallback, and the 404 revocation path.
//!
//! Tier order is fixed: the primary host (built-in or from the credential's
//! host suffix), then a concurrent race against the backup endpoints (only
//! when the primary host is the built-in default), then the local cache.
//! A 404 from any tier short-circuits all fallback: the credential has been
//! revoked, so the cache entry is deleted and the invocation fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use envkey_crypto::CryptoSuite;
use reqwest::StatusCode;
use tokio::task::JoinSet;
use tracing::debug;

use crate::cache::Cache;
use crate::credential::Credential;
use crate::envelope::Envelope;
use crate::error::FetchError;
use crate::http::HttpHandle;
use crate::parser;

pub const DEFAULT_HOST: &str = "env.envkey.com";
pub const BACKUP_HOST: &str = "s3-eu-west-1.amazonaws.com/envkey-backup/envs";
pub const BACKUP_HOST_RESTRICTED: &str =
    "me66hg5t17.execute-api.eu-west-1.amazonaws.com/default/envBackup";
pub const API_VERSION: u32 = 1;

pub const DEFAULT_CLIENT_NAME: &str = "envkey-fetch";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Endpoint set for one invocation. Self-hosted deployments and tests
/// override these; everyone else uses the built-ins.
#[derive(Debug, Clone)]
pub struct Hosts {
    pub default_host: String,
    /// Exactly two backup endpoints: an S3-style base (path-addressed) and a
    /// gateway base (query-addressed).
    pub backup_hosts: [String; 2],
}

impl Default for Hosts {
    fn default() -> Self {
        Self {
            default_host: DEFAULT_HOST.to_string(),
            backup_hosts: [BACKUP_HOST.to_string(), BACKUP_HOST_RESTRICTED.to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub should_cache: bool,
    /// Cache directory; `None` means `$HOME/.envkey/cache`.
    pub cache_dir: Option<PathBuf>,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    /// Attempts against the primary host. Backoff between attempts is
    /// `retry_backoff * 2^(attempt - 1)` seconds. Backups and the cache get
    /// a single attempt each.
    pub retries: u8,
    pub retry_backoff: f64,
    pub timeout_seconds: f64,
    pub hosts: Hosts,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            should_cache: false,
            cache_dir: None,
            client_name: None,
            client_version: None,
            retries: 3,
            retry_backoff: 1.0,
            timeout_seconds: 10.0,
            hosts: Hosts::default(),
        }
    }
}

/// Fetch, verify, and decrypt the environment for `envkey`, returning the
/// final JSON string.
pub async fn fetch<C: CryptoSuite>(
    suite: &C,
    envkey: &str,
    options: &FetchOptions,
) -> Result<String, FetchError> {
    let credential = Credential::parse(envkey)?;
    let http = HttpHandle::new(options.timeout_seconds)?;

    let cache = if options.should_cache {
        open_cache(options)
    } else {
        None
    };

    let body = fetch_envelope_body(&http, &credential, options, cache.as_ref()).await?;
    let envelope: Envelope = serde_json::from_slice(&body)
        .map_err(|e| FetchError::EnvelopeInvalid(format!("response is not a valid envelope: {e}")))?;

    // Persist the raw ciphertext off the return path while decryption runs.
    if envelope.allow_caching {
        if let Some(cache) = &cache {
            cache.write(&credential.id, body);
        }
    }

    debug!("parsing and decrypting response");
    let output = match parser::parse(suite, &http, &envelope, credential.passphrase.as_str()).await
    {
        Ok(output) => output,
        Err(err) => {
            debug!(%err, "parsing and decrypting failed");
            if let Some(cache) = &cache {
                let _ = cache.delete(&credential.id);
            }
            return Err(FetchError::CredentialInvalid);
        }
    };

    // Give an in-flight cache write a chance to settle, without waiting.
    if let Some(cache) = &cache {
        let _ = cache.write_settled();
    }

    Ok(output)
}

fn open_cache(options: &FetchOptions) -> Option<Arc<Cache>> {
    let dir = options.cache_dir.clone().or_else(Cache::default_dir)?;
    debug!(dir = %dir.display(), "initializing cache");
    match Cache::open(&dir) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            // A broken cache downgrades to an uncached run.
            debug!(%err, "cache unavailable, continuing without it");
            None
        }
    }
}

async fn fetch_envelope_body(
    http: &HttpHandle,
    credential: &Credential,
    options: &FetchOptions,
    cache: Option<&Arc<Cache>>,
) -> Result<Vec<u8>, FetchError> {
    let url = primary_url(credential.host.as_deref(), &credential.id, options);
    debug!(%url, "attempting to load encrypted config from primary url");

    let fetch_err: String;
    match primary_fetch(http, &url, options).await {
        Ok(response) => {
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return revoked(cache, &credential.id);
            }
            if status.is_success() {
                debug!(%url, "loaded from primary url");
                return read_body(response).await;
            }
            // Only server failure (5xx) is eligible for backup and cache
            // fallback; any other status is terminal.
            if status.as_u16() < 500 {
                return Err(FetchError::NetworkExhausted(format!(
                    "{url}: unexpected status {status}"
                )));
            }
            debug!(%url, %status, "primary fetch failed");
            fetch_err = format!("{url}: status {status}");
        }
        Err(err) => {
            debug!(%url, %err, "primary fetch failed");
            fetch_err = format!("{url}: {err}");
        }
    }

    // Backups mirror the built-in host only; a custom host gets no race.
    let using_default_host = match credential.host.as_deref() {
        None => true,
        Some(host) => host == options.hosts.default_host,
    };

    let backup_err = if using_default_host {
        debug!("attempting to load encrypted config from backup urls");
        match backup_race(http, &credential.id, options).await {
            Ok(BackupOutcome::Success(response)) => return read_body(response).await,
            Ok(BackupOutcome::NotFound) => return revoked(cache, &credential.id),
            Err(errors) => Some(errors),
        }
    } else {
        None
    };

    // Both network tiers failed; the cache is the last resort.
    let Some(cache) = cache else {
        return Err(network_exhausted(&fetch_err, backup_err.as_deref(), None));
    };
    match cache.read(&credential.id).await {
        Ok(body) => {
            debug!("loaded encrypted config from cache");
            Ok(body)
        }
        Err(err) => Err(network_exhausted(
            &fetch_err,
            backup_err.as_deref(),
            Some(&err.to_string()),
        )),
    }
}

/// Single-attempt semantics with a retry loop bolted on: only the primary
/// host is retried, and only on transport errors or 5xx. A 404 or any
/// non-5xx status returns immediately for the caller to interpret.
async fn primary_fetch(
    http: &HttpHandle,
    url: &str,
    options: &FetchOptions,
) -> Result<reqwest::Response, String> {
    let attempts = options.retries.max(1);
    let mut last_err = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = options.retry_backoff * 2f64.powi(i32::from(attempt) - 2);
            debug!(attempt, delay, "retrying primary fetch");
            // a non-finite or negative backoff skips the pause
            if let Ok(pause) = Duration::try_from_secs_f64(delay) {
                tokio::time::sleep(pause).await;
            }
        }
        match http.get(url).await {
            Ok(response) => {
                if response.status().as_u16() >= 500 && attempt < attempts {
                    last_err = format!("status {}", response.status());
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                last_err = err.to_string();
            }
        }
    }
    Err(last_err)
}

enum BackupOutcome {
    Success(reqwest::Response),
    NotFound,
}

/// Race all backup endpoints concurrently. The first 2xx wins and aborts
/// the rest; a 404 from any endpoint is a revocation; if every endpoint
/// fails the accumulated errors are returned.
async fn backup_race(
    http: &HttpHandle,
    id: &str,
    options: &FetchOptions,
) -> Result<BackupOutcome, String> {
    let mut in_flight = JoinSet::new();
    for url in backup_urls(id, options) {
        let http = http.clone();
        in_flight.spawn(async move {
            let result = http.get(&url).await;
            (url, result)
        });
    }

    let mut errors = Vec::new();
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok((url, Ok(response))) => {
                if response.status() == StatusCode::NOT_FOUND {
                    in_flight.abort_all();
                    return Ok(BackupOutcome::NotFound);
                }
                if response.status().is_success() {
                    debug!(%url, "loaded from backup url");
                    in_flight.abort_all();
                    return Ok(BackupOutcome::Success(response));
                }
                debug!(%url, status = %response.status(), "backup fetch failed");
                errors.push(format!("{url}: status {}", response.status()));
            }
            Ok((url, Err(err))) => {
                debug!(%url, %err, "backup fetch failed");
                errors.push(format!("{url}: {err}"));
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => errors.push(join_err.to_string()),
        }
    }
    Err(errors.join("\n"))
}

fn revoked(cache: Option<&Arc<Cache>>, id: &str) -> Result<Vec<u8>, FetchError> {
    // The credential may have been revoked server-side; a stale cache entry
    // must not outlive it.
    if let Some(cache) = cache {
        let _ = cache.delete(id);
    }
    Err(FetchError::CredentialInvalid)
}

async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
    response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| FetchError::NetworkExhausted(format!("error reading response body: {e}")))
}

fn network_exhausted(
    fetch_err: &str,
    backup_err: Option<&str>,
    cache_err: Option<&str>,
) -> FetchError {
    let mut message = if cache_err.is_some() {
        "could not load from server, s3 backup, or cache.".to_string()
    } else {
        "could not load from server or s3 backup.".to_string()
    };
    message.push_str(&format!("\nfetch error: {fetch_err}"));
    if let Some(err) = backup_err {
        message.push_str(&format!("\nbackup fetch error: {err}"));
    }
    if let Some(err) = cache_err {
        message.push_str(&format!("\ncache read error: {err}"));
    }
    FetchError::NetworkExhausted(message)
}

// ── URL derivation ──────────────────────────────────────────────────────────

/// `http://` only for localhost (with or without a port), `https://`
/// everywhere else.
fn protocol_for(host: &str) -> &'static str {
    let bare = host.split(':').next().unwrap_or(host);
    if bare == "localhost" {
        "http://"
    } else {
        "https://"
    }
}

fn query_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Append the client-identification query parameters, respecting any query
/// string already present on the base.
fn with_logging_params(base: &str, options: &FetchOptions) -> String {
    let client_name = options
        .client_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_CLIENT_NAME);
    let client_version = options
        .client_version
        .as_deref()
        .filter(|version| !version.is_empty())
        .unwrap_or(VERSION);

    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}clientName={}&clientVersion={}&clientOs={}&clientArch={}",
        query_escape(client_name),
        query_escape(client_version),
        query_escape(std::env::consts::OS),
        query_escape(std::env::consts::ARCH),
    )
}

fn primary_url(credential_host: Option<&str>, id: &str, options: &FetchOptions) -> String {
    let host = credential_host
        .filter(|host| !host.is_empty())
        .unwrap_or(&options.hosts.default_host);
    let base = format!("{}{}/v{}/{}", protocol_for(host), host, API_VERSION, id);
    with_logging_params(&base, options)
}

fn backup_urls(id: &str, options: &FetchOptions) -> [String; 2] {
    let [s3, gateway] = &options.hosts.backup_hosts;
    [
        with_logging_params(
            &format!("{}{}/v{}/{}", protocol_for(s3), s3, API_VERSION, id),
            options,
        ),
        with_logging_params(
            &format!("{}{}?v={}&id={}", protocol_for(gateway), gateway, API_VERSION, id),
            options,
        ),
    ]
}
