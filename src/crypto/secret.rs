//! Cipher secret material

use crate::error::{Result, UploaderError};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;

/// Symmetric key and IV generated for a single file
///
/// The secret is the only way to decrypt the stored ciphertext, so it is
/// handed to the key store once the network has accepted the file.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherSecret {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl CipherSecret {
    /// Generate fresh key material from the OS random source
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_parts(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Hex encoding of `key || iv`, the form persisted by key stores
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(KEY_LEN + IV_LEN);
        bytes.extend_from_slice(&self.key);
        bytes.extend_from_slice(&self.iv);
        hex::encode(bytes)
    }

    /// Parse the output of [`CipherSecret::to_hex`]
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| UploaderError::cipher_error(format!("invalid secret encoding: {}", e)))?;
        if bytes.len() != KEY_LEN + IV_LEN {
            return Err(UploaderError::cipher_error(format!(
                "secret must be {} bytes, got {}",
                KEY_LEN + IV_LEN,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        iv.copy_from_slice(&bytes[KEY_LEN..]);
        Ok(Self { key, iv })
    }
}

impl std::fmt::Debug for CipherSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherSecret")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

impl Serialize for CipherSecret {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CipherSecret {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        CipherSecret::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_differ() {
        let a = CipherSecret::generate();
        let b = CipherSecret::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_encoding() {
        let secret = CipherSecret::from_parts([7u8; KEY_LEN], [9u8; IV_LEN]);
        let encoded = secret.to_hex();
        assert_eq!(encoded.len(), (KEY_LEN + IV_LEN) * 2);
        assert_eq!(CipherSecret::from_hex(&encoded).unwrap(), secret);
        assert!(CipherSecret::from_hex("abcd").is_err());
        assert!(CipherSecret::from_hex("zz").is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = CipherSecret::from_parts([1u8; KEY_LEN], [2u8; IV_LEN]);
        let printed = format!("{:?}", secret);
        assert!(printed.contains("redacted"));
        assert!(!printed.contains("0101"));
    }
}
