use k256::{SecretKey, elliptic_curve::sec1::ToEncodedPoint as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::constants::{DEFAULT_KEY_PREFIX, DEFAULT_KEY_SECRET, SIGNING_KEY_ROLE};

const WIF_VERSION: u8 = 0x80;
const CHECKSUM_LEN: usize = 4;
const SECRET_LEN: usize = 32;
const NULL_KEY_BODY: &str = "1111111111111111111111111111111114T1Anm";

#[derive(Debug, Error)]
pub enum KeyDerivationError {
    #[error("derived secret for '{name}' is not a valid secp256k1 scalar")]
    InvalidScalar { name: String },
    #[error("private key is not valid base58: {source}")]
    Base58 {
        #[source]
        source: bs58::decode::Error,
    },
    #[error("private key has unexpected layout ({len} bytes)")]
    Layout { len: usize },
    #[error("private key checksum mismatch")]
    Checksum,
}

/// Private key in WIF form plus its prefixed public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPair {
    private_key: String,
    public_key: String,
}

impl KeyPair {
    /// Derives the signing key of `name` with the default role and secret.
    pub fn for_witness(name: &str) -> Result<Self, KeyDerivationError> {
        derive_keypair(name, SIGNING_KEY_ROLE, DEFAULT_KEY_SECRET, DEFAULT_KEY_PREFIX)
    }

    /// Rebuilds a pair from an existing WIF private key.
    pub fn from_wif(wif: &str, prefix: &str) -> Result<Self, KeyDerivationError> {
        let raw = bs58::decode(wif)
            .into_vec()
            .map_err(|source| KeyDerivationError::Base58 { source })?;
        if raw.len() != 1 + SECRET_LEN + CHECKSUM_LEN || raw[0] != WIF_VERSION {
            return Err(KeyDerivationError::Layout { len: raw.len() });
        }
        let (payload, checksum) = raw.split_at(1 + SECRET_LEN);
        if checksum != &double_sha256(payload)[..CHECKSUM_LEN] {
            return Err(KeyDerivationError::Checksum);
        }
        let secret = SecretKey::from_slice(&payload[1..]).map_err(|_| {
            KeyDerivationError::InvalidScalar {
                name: "<wif>".to_owned(),
            }
        })?;
        Ok(Self {
            private_key: wif.to_owned(),
            public_key: encode_public(&secret, prefix),
        })
    }

    #[must_use]
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

/// Deterministic keys: the secret is `sha256(name || role || secret)`.
pub fn derive_keypair(
    name: &str,
    role: &str,
    secret: &str,
    prefix: &str,
) -> Result<KeyPair, KeyDerivationError> {
    let seed = Sha256::digest(format!("{name}{role}{secret}").as_bytes());
    let secret_key =
        SecretKey::from_slice(&seed).map_err(|_| KeyDerivationError::InvalidScalar {
            name: name.to_owned(),
        })?;

    let mut payload = Vec::with_capacity(1 + SECRET_LEN);
    payload.push(WIF_VERSION);
    payload.extend_from_slice(&seed);

    Ok(KeyPair {
        private_key: bs58::encode(with_checksum(payload)).into_string(),
        public_key: encode_public(&secret_key, prefix),
    })
}

/// Public key that the node treats as "no signing key": a witness carrying
/// it is skipped by the producer schedule.
#[must_use]
pub fn null_public_key(prefix: &str) -> String {
    format!("{prefix}{NULL_KEY_BODY}")
}

fn encode_public(secret: &SecretKey, prefix: &str) -> String {
    let point = secret.public_key().to_encoded_point(true);
    let body = bs58::encode(with_checksum(point.as_bytes().to_vec())).into_string();
    format!("{prefix}{body}")
}

fn with_checksum(mut payload: Vec<u8>) -> Vec<u8> {
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    payload
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = KeyPair::for_witness("witness-0-0").unwrap();
        let b = KeyPair::for_witness("witness-0-0").unwrap();
        let c = KeyPair::for_witness("witness-0-1").unwrap();

        assert_eq!(a, b);
        assert_ne!(a.public_key(), c.public_key());
        assert!(a.public_key().starts_with(DEFAULT_KEY_PREFIX));
    }

    #[test]
    fn wif_reconstructs_public_key() {
        let derived = KeyPair::for_witness("alice").unwrap();
        let restored = KeyPair::from_wif(derived.private_key(), DEFAULT_KEY_PREFIX).unwrap();

        assert_eq!(derived, restored);
    }

    #[test]
    fn corrupted_wif_is_rejected() {
        let derived = KeyPair::for_witness("alice").unwrap();
        let mut raw = bs58::decode(derived.private_key()).into_vec().unwrap();
        raw[5] ^= 0xff;
        let corrupted = bs58::encode(raw).into_string();

        assert!(matches!(
            KeyPair::from_wif(&corrupted, DEFAULT_KEY_PREFIX),
            Err(KeyDerivationError::Checksum)
        ));
    }

    #[test]
    fn null_key_uses_prefix() {
        assert_eq!(
            null_public_key("TST"),
            "TST1111111111111111111111111111111114T1Anm"
        );
    }
}
