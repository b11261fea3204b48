//! Signed URL generation and inbound expiry checks.

use crate::error::{SignerError, SignerResult};
use crate::key::load_private_key_pem;
use base64::Engine;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::{SigningKey, VerifyingKey};
use rsa::signature::{Keypair, SignatureEncoding, Signer};
use sha2::Sha256;
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;

/// Issues time-boxed signed URLs for objects addressed as `/bucket/name`.
///
/// The string to sign follows the V2 query-string scheme:
/// `METHOD\n\n\n{expires}\n/{bucket}/{escaped name}`, signed with
/// RSASSA-PKCS1-v1_5 over SHA-256.
pub struct UrlSigner {
    access_id: String,
    signing_key: SigningKey<Sha256>,
    validity: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("access_id", &self.access_id)
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(access_id: impl Into<String>, private_key: RsaPrivateKey, validity: Duration) -> Self {
        Self {
            access_id: access_id.into(),
            signing_key: SigningKey::<Sha256>::new(private_key),
            validity,
        }
    }

    /// Create from a PEM encoded private key.
    pub fn from_pem(
        access_id: impl Into<String>,
        pem: &str,
        validity: Duration,
    ) -> SignerResult<Self> {
        let key = load_private_key_pem(pem)?;
        Ok(Self::new(access_id, key, validity))
    }

    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Key that verifies signatures produced by this signer.
    pub fn verifying_key(&self) -> VerifyingKey<Sha256> {
        self.signing_key.verifying_key()
    }

    /// Sign `path` for `method`, valid for the configured window.
    ///
    /// Returns the escaped path with the signing query appended, ready to
    /// be joined onto the origin base URL.
    pub fn sign_path(&self, method: &str, path: &str) -> SignerResult<String> {
        self.sign_path_with_expiry(method, path, OffsetDateTime::now_utc() + self.validity)
    }

    pub fn sign_path_with_expiry(
        &self,
        method: &str,
        path: &str,
        expires: OffsetDateTime,
    ) -> SignerResult<String> {
        let (bucket, name) = split_bucket_and_name(path)?;
        let resource = escape_resource(bucket, name)?;
        let expires = expires.unix_timestamp();

        let to_sign = string_to_sign(method, &resource, expires);
        let signature = self
            .signing_key
            .try_sign(to_sign.as_bytes())
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        let signature = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Expires", &expires.to_string())
            .append_pair("GoogleAccessId", &self.access_id)
            .append_pair("Signature", &signature)
            .finish();

        Ok(format!("{resource}?{query}"))
    }
}

/// Canonical string covered by the signature.
pub fn string_to_sign(method: &str, resource: &str, expires: i64) -> String {
    format!("{method}\n\n\n{expires}\n{resource}")
}

/// Percent-escape `/{bucket}/{name}` the way it will appear on the wire.
///
/// Existing `%XX` escapes are kept as-is, so an already-escaped request
/// path signs to the same resource it is sent as.
fn escape_resource(bucket: &str, name: &str) -> SignerResult<String> {
    let mut url = Url::parse("http://resource.invalid/")
        .map_err(|e| SignerError::Signing(e.to_string()))?;
    url.set_path(&format!("/{bucket}/{name}"));
    Ok(url.path().to_string())
}

/// Split `/bucket/name/with/slashes` into `("bucket", "name/with/slashes")`.
pub fn split_bucket_and_name(path: &str) -> SignerResult<(&str, &str)> {
    let mut parts = path.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(""), Some(bucket), Some(name)) if !bucket.is_empty() && !name.is_empty() => {
            Ok((bucket, name))
        }
        _ => Err(SignerError::InvalidPath(path.to_string())),
    }
}

/// Check the `Expires` parameter of an inbound query string.
///
/// Only expiry is checked. The `Signature` parameter is not verified, so
/// anyone can mint a URL that passes this check.
pub fn verify_expiry(query: Option<&str>, now: OffsetDateTime) -> SignerResult<()> {
    let expires = query
        .into_iter()
        .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
        .find(|(k, _)| k == "Expires")
        .and_then(|(_, v)| v.parse::<i64>().ok())
        .ok_or(SignerError::MissingExpiry)?;

    if now.unix_timestamp() > expires {
        return Err(SignerError::Expired(expires));
    }
    Ok(())
}
