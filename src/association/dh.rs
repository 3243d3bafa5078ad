//! Diffie-Hellman key agreement used to encrypt association MAC keys.

use crate::association::AssociationType;
use crate::message::association::AssociationSessionType;
use crate::Error;
use base64ct::{Base64, Encoding};
use num_bigint::BigUint;
use num_traits::One;
use rand::{rngs::OsRng, RngCore};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;

/// Default OpenID modulus (a 1024-bit safe prime).
pub const DEFAULT_MODULUS_HEX: &str = concat!(
    "DCF93A0B883972EC0E19989AC5A2CE310E1D37717E8D9571BB7623731866E61E",
    "F75A2E27898B057F9891C2E27A639C3F29B60814581CD3B2CA3986D268370557",
    "7D45C2E7E52DC81C7A171876E5CEA74B1448BFDFAF18828EFD2519F14E45E382",
    "6634AF1949E5B535CC829A483B8A76223E5D490A257F05BDFF16F2FB22C583AB",
);

pub const DEFAULT_GENERATOR: u32 = 2;

/// Largest modulus accepted from a peer.
pub const MAX_MODULUS_BITS: u64 = 4096;

#[must_use]
pub fn default_modulus() -> BigUint {
    BigUint::parse_bytes(DEFAULT_MODULUS_HEX.as_bytes(), 16).unwrap_or_default()
}

#[must_use]
pub fn default_generator() -> BigUint {
    BigUint::from(DEFAULT_GENERATOR)
}

/// Big-endian two's complement of a non-negative integer: a leading zero
/// byte is added when the high bit is set.
#[must_use]
pub fn btwoc(n: &BigUint) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        let mut padded = Vec::with_capacity(bytes.len() + 1);
        padded.push(0);
        padded.extend_from_slice(&bytes);
        padded
    } else {
        bytes
    }
}

#[must_use]
pub fn btwoc_base64(n: &BigUint) -> String {
    Base64::encode_string(&btwoc(n))
}

/// Decode a base64 btwoc integer.
///
/// # Errors
///
/// Returns an error if the value is not valid base64 or is empty.
pub fn btwoc_from_base64(value: &str) -> Result<BigUint, Error> {
    let bytes = Base64::decode_vec(value)
        .map_err(|e| Error::Association(format!("invalid base64 integer: {e}")))?;
    if bytes.is_empty() {
        return Err(Error::Association("empty base64 integer".to_string()));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn digest(hash: AssociationType, data: &[u8]) -> Vec<u8> {
    match hash {
        AssociationType::HmacSha1 => Sha1::digest(data).to_vec(),
        AssociationType::HmacSha256 => Sha256::digest(data).to_vec(),
    }
}

pub struct DiffieHellmanSession {
    session_type: AssociationSessionType,
    hash: AssociationType,
    modulus: BigUint,
    generator: BigUint,
    private_key: BigUint,
    public_key: BigUint,
}

impl fmt::Debug for DiffieHellmanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffieHellmanSession")
            .field("session_type", &self.session_type)
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

impl DiffieHellmanSession {
    /// Start a session with a fresh private key.
    ///
    /// # Errors
    ///
    /// Returns an error if `session_type` is not a DH session type or the
    /// group parameters are unusable.
    pub fn create(
        session_type: AssociationSessionType,
        modulus: BigUint,
        generator: BigUint,
    ) -> Result<Self, Error> {
        let hash = session_type.hash_algorithm().ok_or_else(|| {
            Error::Association(format!(
                "not a Diffie-Hellman session type: {}",
                session_type.session_type()
            ))
        })?;

        let three = BigUint::from(3u8);
        if modulus < three {
            return Err(Error::Association("DH modulus too small".to_string()));
        }
        if modulus.bits() > MAX_MODULUS_BITS {
            return Err(Error::Association(format!(
                "DH modulus larger than {MAX_MODULUS_BITS} bits"
            )));
        }
        if generator <= BigUint::one() || generator >= modulus {
            return Err(Error::Association("DH generator out of range".to_string()));
        }

        let private_key = random_private_key(&modulus);
        let public_key = generator.modpow(&private_key, &modulus);

        Ok(Self {
            session_type,
            hash,
            modulus,
            generator,
            private_key,
            public_key,
        })
    }

    /// Session over the default OpenID group.
    ///
    /// # Errors
    ///
    /// Returns an error if `session_type` is not a DH session type.
    pub fn with_defaults(session_type: AssociationSessionType) -> Result<Self, Error> {
        Self::create(session_type, default_modulus(), default_generator())
    }

    /// Session over a group received as base64 btwoc values; absent values
    /// fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded values cannot be decoded or are unusable.
    pub fn from_base64(
        session_type: AssociationSessionType,
        modulus: Option<&str>,
        generator: Option<&str>,
    ) -> Result<Self, Error> {
        let modulus = modulus.map_or_else(|| Ok(default_modulus()), btwoc_from_base64)?;
        let generator = generator.map_or_else(|| Ok(default_generator()), btwoc_from_base64)?;
        Self::create(session_type, modulus, generator)
    }

    #[must_use]
    pub fn session_type(&self) -> AssociationSessionType {
        self.session_type
    }

    #[must_use]
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    #[must_use]
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    #[must_use]
    pub fn public_key(&self) -> &BigUint {
        &self.public_key
    }

    #[must_use]
    pub fn public_key_base64(&self) -> String {
        btwoc_base64(&self.public_key)
    }

    #[must_use]
    pub fn modulus_base64(&self) -> String {
        btwoc_base64(&self.modulus)
    }

    #[must_use]
    pub fn generator_base64(&self) -> String {
        btwoc_base64(&self.generator)
    }

    #[must_use]
    pub fn is_default_group(&self) -> bool {
        self.modulus == default_modulus() && self.generator == default_generator()
    }

    fn shared_secret_digest(&self, peer_public_key: &str) -> Result<Vec<u8>, Error> {
        let peer = btwoc_from_base64(peer_public_key)?;
        let two = BigUint::from(2u8);
        // Rejects 0, 1 and p-1, which would force a predictable shared secret.
        if peer < two || peer > &self.modulus - &two {
            return Err(Error::Association(
                "DH public key out of range".to_string(),
            ));
        }
        let shared = peer.modpow(&self.private_key, &self.modulus);
        Ok(digest(self.hash, &btwoc(&shared)))
    }

    /// `H(btwoc(g^xy mod p)) XOR mac_key`, base64 encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer key is malformed or the MAC key length
    /// differs from the session hash length.
    pub fn encrypt_mac_key(&self, mac_key: &[u8], peer_public_key: &str) -> Result<String, Error> {
        let hashed = self.shared_secret_digest(peer_public_key)?;
        if hashed.len() != mac_key.len() {
            return Err(Error::Association(format!(
                "MAC key length {} does not match {} digest length {}",
                mac_key.len(),
                self.session_type.session_type(),
                hashed.len()
            )));
        }
        let encrypted: Vec<u8> = hashed.iter().zip(mac_key).map(|(h, k)| h ^ k).collect();
        Ok(Base64::encode_string(&encrypted))
    }

    /// Recover a MAC key sent as `enc_mac_key` by the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is malformed or the lengths disagree.
    pub fn decrypt_mac_key(
        &self,
        enc_mac_key: &str,
        peer_public_key: &str,
    ) -> Result<Vec<u8>, Error> {
        let encrypted = Base64::decode_vec(enc_mac_key)
            .map_err(|e| Error::Association(format!("invalid enc_mac_key: {e}")))?;
        let hashed = self.shared_secret_digest(peer_public_key)?;
        if hashed.len() != encrypted.len() {
            return Err(Error::Association(format!(
                "enc_mac_key length {} does not match digest length {}",
                encrypted.len(),
                hashed.len()
            )));
        }
        Ok(hashed.iter().zip(&encrypted).map(|(h, k)| h ^ k).collect())
    }
}

/// Uniform-ish value in `[1, p-1]`.
fn random_private_key(modulus: &BigUint) -> BigUint {
    let mut bytes = vec![0u8; modulus.to_bytes_be().len() + 8];
    OsRng.fill_bytes(&mut bytes);
    let range = modulus - BigUint::one();
    BigUint::from_bytes_be(&bytes) % &range + BigUint::one()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn dh_sha256() -> AssociationSessionType {
        AssociationSessionType::DH_SHA256
    }

    #[test]
    fn default_modulus_is_1024_bits() {
        assert_eq!(default_modulus().bits(), 1024);
        assert_eq!(default_generator(), BigUint::from(2u8));
    }

    #[test]
    fn btwoc_pads_high_bit() {
        assert_eq!(btwoc(&BigUint::from(0x7fu8)), vec![0x7f]);
        assert_eq!(btwoc(&BigUint::from(0x80u8)), vec![0x00, 0x80]);
        assert_eq!(btwoc(&BigUint::from(0x0100u16)), vec![0x01, 0x00]);
        // The default modulus starts with 0xDC, so it gets padded.
        assert_eq!(btwoc(&default_modulus()).len(), 129);
    }

    #[test]
    fn btwoc_base64_round_trip() -> Result<(), Error> {
        let n = default_modulus();
        assert_eq!(btwoc_from_base64(&btwoc_base64(&n))?, n);
        Ok(())
    }

    #[test]
    fn both_sides_agree_on_mac_key() -> Result<(), Error> {
        for session_type in [
            AssociationSessionType::DH_COMPAT_SHA1,
            AssociationSessionType::DH_SHA1,
            AssociationSessionType::DH_SHA256,
        ] {
            let rp = DiffieHellmanSession::with_defaults(session_type)?;
            let op = DiffieHellmanSession::with_defaults(session_type)?;
            let key_len = session_type.association_type().mac_key_len();
            let mac_key: Vec<u8> = (0..key_len).map(|i| i as u8).collect();

            let enc = op.encrypt_mac_key(&mac_key, &rp.public_key_base64())?;
            let dec = rp.decrypt_mac_key(&enc, &op.public_key_base64())?;
            assert_eq!(dec, mac_key);
        }
        Ok(())
    }

    #[test]
    fn custom_group_is_not_default() -> Result<(), Error> {
        // 23 is prime, 5 is a generator mod 23.
        let session =
            DiffieHellmanSession::create(dh_sha256(), BigUint::from(23u8), BigUint::from(5u8))?;
        assert!(!session.is_default_group());
        assert!(DiffieHellmanSession::with_defaults(dh_sha256())?.is_default_group());
        Ok(())
    }

    #[test]
    fn rejects_degenerate_peer_keys() -> Result<(), Error> {
        let session = DiffieHellmanSession::with_defaults(dh_sha256())?;
        let p_minus_one = default_modulus() - BigUint::one();
        for peer in [BigUint::zero(), BigUint::one(), p_minus_one] {
            let result = session.encrypt_mac_key(&[0u8; 32], &btwoc_base64(&peer));
            assert!(matches!(result, Err(Error::Association(_))));
        }
        Ok(())
    }

    #[test]
    fn rejects_mismatched_key_length() -> Result<(), Error> {
        let rp = DiffieHellmanSession::with_defaults(dh_sha256())?;
        let op = DiffieHellmanSession::with_defaults(dh_sha256())?;
        let result = op.encrypt_mac_key(&[0u8; 20], &rp.public_key_base64());
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn rejects_no_encryption_session() {
        let result =
            DiffieHellmanSession::with_defaults(AssociationSessionType::NO_ENCRYPTION_SHA256MAC);
        assert!(matches!(result, Err(Error::Association(_))));
    }

    #[test]
    fn rejects_oversized_modulus() {
        let mut bytes = vec![0xffu8; 513];
        bytes[0] = 0x01;
        let result = DiffieHellmanSession::create(
            dh_sha256(),
            BigUint::from_bytes_be(&bytes),
            default_generator(),
        );
        assert!(matches!(result, Err(Error::Association(_))));
    }

    #[test]
    fn from_base64_defaults_missing_values() -> Result<(), Error> {
        let session = DiffieHellmanSession::from_base64(dh_sha256(), None, None)?;
        assert!(session.is_default_group());
        Ok(())
    }
}
