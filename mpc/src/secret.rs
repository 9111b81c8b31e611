//! Secrets locking the spend and revoke branches of channel scripts.
//!
//! A [`Secret`] never appears on chain until it is intentionally disclosed,
//! only its [`SecretHash`] does, so the hash function must be the one used by
//! `OP_HASH160`.

use std::fmt;

use bitcoin::hashes::{hash160, Hash};
use bitcoin::hex::DisplayHex;
use secp256k1_zkp::rand::{thread_rng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Error;

/// Size in bytes of a channel secret.
pub const SECRET_SIZE: usize = 32;

/// Commitment to a [`Secret`] as it appears in channel scripts.
pub type SecretHash = hash160::Hash;

/// A 32 bytes random value used either as the spend secret of a channel or as
/// the revoke secret of a commit. The bytes are wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_SIZE]);

impl Secret {
    /// Draws a new secret from the thread local cryptographically secure
    /// random number generator.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let mut bytes = [0u8; SECRET_SIZE];
        thread_rng().fill_bytes(&mut bytes);
        Secret(bytes)
    }

    /// Creates a secret from the given bytes, which must be exactly
    /// [`SECRET_SIZE`] long.
    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        if data.len() != SECRET_SIZE {
            return Err(Error::InvalidArgument);
        }
        let mut bytes = [0u8; SECRET_SIZE];
        bytes.copy_from_slice(data);
        Ok(Secret(bytes))
    }

    /// Returns the raw secret.
    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    /// Returns the HASH160 commitment of the secret.
    pub fn hash(&self) -> SecretHash {
        hash160::Hash::hash(&self.0)
    }

    /// Lower hex encoding of the secret, to be used when disclosing it.
    pub fn to_hex(&self) -> String {
        self.0.as_slice().to_lower_hex_string()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.hash())
    }
}

#[cfg(feature = "use-serde")]
impl serde::Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

#[cfg(feature = "use-serde")]
impl<'de> serde::Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use bitcoin::hex::FromHex;

        let bytes = if deserializer.is_human_readable() {
            let string: String = serde::Deserialize::deserialize(deserializer)?;
            Vec::<u8>::from_hex(&string).map_err(serde::de::Error::custom)?
        } else {
            serde::Deserialize::deserialize(deserializer)?
        };
        Secret::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}
