//! Signed origin URLs for larder.
//!
//! This crate provides:
//! - RSA private key loading (PKCS#8 or PKCS#1 PEM)
//! - Time-boxed V2-style signed URLs for GET/HEAD against a bucket store
//! - The inbound `Expires` check applied before serving from cache

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::load_private_key_pem;
pub use signer::{UrlSigner, split_bucket_and_name, verify_expiry};
