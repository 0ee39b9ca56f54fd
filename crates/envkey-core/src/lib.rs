//! envkey-core — fetch pipeline, trust graph, and payload verifier
//!
//! Turns an ENVKEY credential into a flat JSON object of environment
//! variables: fetch the encrypted envelope (primary host → backup race →
//! disk cache), verify the web-of-trust signature chain rooted in the
//! envelope's own creator-trusted set, decrypt, and merge inheritance
//! overrides.
//!
//! # Module layout
//! - `credential` — ENVKEY string splitting
//! - `envelope`   — the server response schema and its completeness rules
//! - `trust`      — trusted maps, invitation chains, signer verification
//! - `parser`     — staged verification and decryption of one envelope
//! - `fetch`      — the resilience pipeline and URL derivation
//! - `cache`      — per-credential disk cache with atomic writes
//! - `http`       — shared client, timeouts, bundled-roots fallback
//! - `error`      — unified error type

pub mod cache;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod fetch;
pub mod http;
pub mod parser;
pub mod trust;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::FetchError;
pub use fetch::{fetch, FetchOptions, Hosts};
