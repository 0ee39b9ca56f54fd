//! envkey-crypto — OpenPGP primitives adapter
//!
//! The verification pipeline never talks to an OpenPGP library directly; it
//! goes through the [`CryptoSuite`] trait so the backend can be swapped.
//! [`Pgp`] is the rPGP-backed implementation used by the CLI.
//!
//! # Module layout
//! - `suite` — the `CryptoSuite` trait (the six payload operations plus two
//!   keyring utilities)
//! - `pgp`   — rPGP implementation
//! - `error` — unified error type

pub mod error;
pub mod pgp;
pub mod suite;

pub use error::CryptoError;
pub use pgp::{Pgp, PgpKeyRing};
pub use suite::CryptoSuite;
