use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_KEY_PREFIX, INIT_WITNESS_NAME, WITNESS_NAME_PREFIX},
    keys::{KeyDerivationError, KeyPair},
};

/// Canonical witness name: `witness-{network}-{index}`.
#[must_use]
pub fn witness_name(network: usize, index: usize) -> String {
    format!("{WITNESS_NAME_PREFIX}-{network}-{index}")
}

/// Init witness of every network after the first one that carries an init
/// node; the first one is the genesis witness.
#[must_use]
pub fn secondary_init_name(network: usize) -> String {
    format!("{INIT_WITNESS_NAME}-{network}")
}

/// A block-producing identity with its deterministic signing keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WitnessIdentity {
    name: String,
    keys: KeyPair,
}

impl WitnessIdentity {
    pub fn new(name: impl Into<String>) -> Result<Self, KeyDerivationError> {
        let name = name.into();
        let keys = KeyPair::for_witness(&name)?;
        Ok(Self { name, keys })
    }

    /// The genesis witness. Its key can be pinned with a WIF so it matches the
    /// key baked into the node binary.
    pub fn init(private_key: Option<&str>) -> Result<Self, KeyDerivationError> {
        let keys = match private_key {
            Some(wif) => KeyPair::from_wif(wif, DEFAULT_KEY_PREFIX)?,
            None => KeyPair::for_witness(INIT_WITNESS_NAME)?,
        };
        Ok(Self {
            name: INIT_WITNESS_NAME.to_owned(),
            keys,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn keys(&self) -> &KeyPair {
        &self.keys
    }
}

impl fmt::Display for WitnessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
