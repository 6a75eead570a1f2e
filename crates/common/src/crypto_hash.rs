use std::hash::{Hash, Hasher};

use anyhow::{anyhow, Result};
use rand::fill;
use serde::{Deserialize, Serialize};

/// 32-byte identifier, hex-encoded on the wire and in the database.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CryptoHash {
    #[serde(with = "hex::serde")]
    hash: [u8; 32],
}

impl CryptoHash {
    pub fn new(hash: [u8; 32]) -> Self {
        Self { hash }
    }

    pub fn random() -> Self {
        let mut arr = [0u8; 32];
        fill(&mut arr[..]);
        Self::new(arr)
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn is_zero(&self) -> bool {
        self.hash == [0u8; 32]
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn from_hex_string(s: &str) -> Result<Self> {
        let decoded = hex::decode(s)?;
        let arr: [u8; 32] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| anyhow!("wrong length for CryptoHash: expected 32 bytes, got {}", v.len()))?;
        Ok(Self::new(arr))
    }
}

impl std::fmt::Display for CryptoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

impl std::str::FromStr for CryptoHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex_string(s)
    }
}

impl Hash for CryptoHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.hash());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = CryptoHash::random();
        let parsed = CryptoHash::from_hex_string(&id.to_hex_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(CryptoHash::from_hex_string("deadbeef").is_err());
    }
}
