//! Associations: shared MAC secrets negotiated between RP and OP.

pub mod dh;
pub mod store;

use crate::Error;
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretSlice};
use sha1::Sha1;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};

/// Handle of a cached negative association attempt. Real handles are
/// printable ASCII without spaces, so this value can never collide.
pub const FAILED_ASSOC_HANDLE: &str = " ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationType {
    HmacSha1,
    HmacSha256,
}

impl AssociationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HMAC-SHA1" => Some(Self::HmacSha1),
            "HMAC-SHA256" => Some(Self::HmacSha256),
            _ => None,
        }
    }

    /// MAC key length in bytes (the digest size of the hash).
    #[must_use]
    pub const fn mac_key_len(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
        }
    }

    #[must_use]
    pub const fn mac_key_bits(self) -> usize {
        self.mac_key_len() * 8
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Association {
    handle: String,
    assoc_type: AssociationType,
    mac_key: SecretSlice<u8>,
    expiry: OffsetDateTime,
}

impl Clone for Association {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            assoc_type: self.assoc_type,
            mac_key: SecretSlice::from(self.mac_key.expose_secret().to_vec()),
            expiry: self.expiry,
        }
    }
}

fn expiry_from_now(expires_in: u64) -> OffsetDateTime {
    let seconds = i64::try_from(expires_in).unwrap_or(i64::MAX);
    OffsetDateTime::now_utc().saturating_add(Duration::seconds(seconds))
}

impl Association {
    /// Wrap an existing MAC key, e.g. one received from an OP.
    ///
    /// # Errors
    ///
    /// Returns an error if the key length does not match the association type.
    pub fn new(
        assoc_type: AssociationType,
        handle: impl Into<String>,
        mac_key: Vec<u8>,
        expires_in: u64,
    ) -> Result<Self, Error> {
        if mac_key.len() != assoc_type.mac_key_len() {
            return Err(Error::Association(format!(
                "MAC key of {} bits does not match {assoc_type} ({} bits)",
                mac_key.len() * 8,
                assoc_type.mac_key_bits()
            )));
        }
        Ok(Self {
            handle: handle.into(),
            assoc_type,
            mac_key: SecretSlice::from(mac_key),
            expiry: expiry_from_now(expires_in),
        })
    }

    /// Fresh association with a random MAC key. `expires_in = 0` yields an
    /// already-expired association.
    #[must_use]
    pub fn generate(assoc_type: AssociationType, handle: impl Into<String>, expires_in: u64) -> Self {
        let mut key = vec![0u8; assoc_type.mac_key_len()];
        OsRng.fill_bytes(&mut key);
        Self {
            handle: handle.into(),
            assoc_type,
            mac_key: SecretSlice::from(key),
            expiry: expiry_from_now(expires_in),
        }
    }

    /// Negative cache entry recording that association with an OP failed.
    #[must_use]
    pub fn failed(expires_in: u64) -> Self {
        Self {
            handle: FAILED_ASSOC_HANDLE.to_string(),
            assoc_type: AssociationType::HmacSha1,
            mac_key: SecretSlice::from(Vec::new()),
            expiry: expiry_from_now(expires_in),
        }
    }

    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    #[must_use]
    pub fn assoc_type(&self) -> AssociationType {
        self.assoc_type
    }

    #[must_use]
    pub fn mac_key(&self) -> &[u8] {
        self.mac_key.expose_secret()
    }

    #[must_use]
    pub fn expiry(&self) -> OffsetDateTime {
        self.expiry
    }

    /// Whole seconds left before expiry, zero once expired.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        let left = (self.expiry - OffsetDateTime::now_utc()).whole_seconds();
        u64::try_from(left).unwrap_or(0)
    }

    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.expiry <= OffsetDateTime::now_utc()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.handle == FAILED_ASSOC_HANDLE
    }

    fn mac(&self, text: &[u8]) -> Result<Vec<u8>, Error> {
        let invalid_key = |_| Error::Association("invalid MAC key".to_string());
        let digest = match self.assoc_type {
            AssociationType::HmacSha1 => {
                let mut mac =
                    <Hmac<Sha1> as Mac>::new_from_slice(self.mac_key()).map_err(invalid_key)?;
                mac.update(text);
                mac.finalize().into_bytes().to_vec()
            }
            AssociationType::HmacSha256 => {
                let mut mac =
                    <Hmac<Sha256> as Mac>::new_from_slice(self.mac_key()).map_err(invalid_key)?;
                mac.update(text);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(digest)
    }

    /// Base64 HMAC of the exact signed text.
    ///
    /// # Errors
    ///
    /// Returns an error if this is the failed-association sentinel.
    pub fn sign(&self, text: &str) -> Result<String, Error> {
        if self.is_failed() {
            return Err(Error::Association(
                "cannot sign with a failed association".to_string(),
            ));
        }
        Ok(Base64::encode_string(&self.mac(text.as_bytes())?))
    }

    /// Constant-time comparison of `signature` against the HMAC of `text`.
    #[must_use]
    pub fn verify_signature(&self, text: &str, signature: &str) -> bool {
        match self.sign(text) {
            Ok(expected) => expected.as_bytes().ct_eq(signature.as_bytes()).into(),
            Err(_) => false,
        }
    }
}
