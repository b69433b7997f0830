//! Private key primitives used to self-sign the webhook CA and to bind the
//! serving certificate.
//!
//! Only RSA is supported, see [`rsa`]. The API server accepts RSA-2048 CA
//! bundles on every Kubernetes version the webhook is deployed to.
//!
//! ```no_run
//! use eni_webhook_certs::keys::rsa::SigningKey;
//! let key = SigningKey::new().unwrap();
//! ```
//!
//! The underlying `rsa` crate is affected by the Marvin timing side channel,
//! see <https://rustsec.org/advisories/RUSTSEC-2023-0071.html>. Keys produced
//! here only ever sign locally and never decrypt attacker supplied data.
pub mod rsa;
