//! Shared HTTP client for one invocation.
//!
//! One reqwest client (one connection pool) serves the primary fetch, the
//! backup race, and indirect pointer resolution. When a request fails
//! because the system root-certificate store is missing or unreadable, the
//! client is swapped once for one built against the bundled webpki roots;
//! the swap is permanent for the invocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Indirect payload pointers get their own short deadline, independent of
/// the configured request timeout.
const INDIRECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct HttpHandle {
    inner: Arc<Inner>,
}

struct Inner {
    client: RwLock<reqwest::Client>,
    timeout: Duration,
    bundled_roots: AtomicBool,
}

impl HttpHandle {
    pub fn new(timeout_seconds: f64) -> Result<Self, FetchError> {
        let timeout = Duration::try_from_secs_f64(timeout_seconds).map_err(|_| {
            FetchError::NetworkExhausted(format!(
                "invalid timeout: {timeout_seconds} seconds"
            ))
        })?;
        let client = build_client(timeout, false).map_err(|e| {
            FetchError::NetworkExhausted(format!("could not initialize http client: {e}"))
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                client: RwLock::new(client),
                timeout,
                bundled_roots: AtomicBool::new(false),
            }),
        })
    }

    fn client(&self) -> reqwest::Client {
        self.inner.client.read().clone()
    }

    pub async fn get(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let err = match self.client().get(url).send().await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        if !is_missing_roots_error(&err) {
            return Err(err);
        }
        // One-shot swap to the bundled root store; later requests in this
        // invocation keep using it.
        if self.inner.bundled_roots.swap(true, Ordering::SeqCst) {
            return Err(err);
        }

        warn!("system root certificates unavailable, switching to bundled roots");
        match build_client(self.inner.timeout, true) {
            Ok(fallback) => {
                *self.inner.client.write() = fallback;
                self.client().get(url).send().await
            }
            Err(build_err) => {
                debug!(%build_err, "could not build bundled-roots client");
                Err(err)
            }
        }
    }

    /// Resolve an indirect payload pointer. Any status ≥ 400 is a failure.
    pub async fn get_indirect(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client()
            .get(url)
            .timeout(INDIRECT_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::IndirectFetchFailed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::IndirectFetchFailed(format!("status {status}")));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| FetchError::IndirectFetchFailed(e.to_string()))
    }
}

fn build_client(timeout: Duration, bundled_roots: bool) -> reqwest::Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .use_rustls_tls()
        .connect_timeout(timeout)
        .timeout(timeout);
    let builder = if bundled_roots {
        builder.tls_built_in_native_certs(false)
    } else {
        builder.tls_built_in_webpki_certs(false)
    };
    builder.build()
}

/// Walk the error chain looking for the signatures rustls produces when no
/// usable system root store exists.
fn is_missing_roots_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        let message = current.to_string();
        if message.contains("failed to load system roots")
            || message.contains("no native root CA certificates")
        {
            return true;
        }
        source = current.source();
    }
    false
}
