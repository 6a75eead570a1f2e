use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::fill;
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{XSalsa20Poly1305, Key, Nonce, NONCE_SIZE};

use crate::crypto_hash::CryptoHash;

pub fn blake3_hash(input: &[u8]) -> CryptoHash {
    CryptoHash::new(*blake3::hash(input).as_bytes())
}

fn cipher_for(secret: &str) -> XSalsa20Poly1305 {
    let key = blake3::hash(secret.as_bytes());
    XSalsa20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Seals `plaintext` with a key derived from `secret`. Output is
/// base64(nonce || ciphertext).
pub fn encrypt(plaintext: &str, secret: &str) -> Result<String> {
    let cipher = cipher_for(secret);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    fill(&mut nonce_bytes[..]);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("encryption failure: {:?}", e))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

pub fn decrypt(sealed: &str, secret: &str) -> Result<String> {
    let cipher = cipher_for(secret);

    let sealed = BASE64.decode(sealed)?;
    if sealed.len() <= NONCE_SIZE {
        return Err(anyhow!("sealed payload too short"));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| anyhow!("decryption failure: {:?}", e))?;

    Ok(String::from_utf8(plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_round_trip() {
        let sealed = encrypt("hello night", "salt").unwrap();
        assert_eq!(decrypt(&sealed, "salt").unwrap(), "hello night");
    }

    #[test]
    fn wrong_secret_fails() {
        let sealed = encrypt("hello night", "salt").unwrap();
        assert!(decrypt(&sealed, "other").is_err());
    }

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_hash(b"somnia"), blake3_hash(b"somnia"));
        assert_ne!(blake3_hash(b"somnia"), blake3_hash(b"other"));
    }
}
