//! Cipher stream factory and the default framed AEAD stream
//!
//! The default stream seals each plaintext chunk as its own ChaCha20-Poly1305
//! frame: `u32 BE length || ciphertext || tag`. Frame `n` uses the secret's IV
//! with its last eight bytes XORed with `n`. A closing frame with an empty
//! payload and a distinct AAD marks the end of the stream so truncation is
//! detected on decrypt.

use crate::crypto::secret::{CipherSecret, IV_LEN};
use crate::error::{Result, UploaderError};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

const DATA_FRAME_AAD: &[u8] = &[0];
const FINAL_FRAME_AAD: &[u8] = &[1];
const LEN_PREFIX: usize = 4;

/// Incremental encryptor fed with plaintext chunks in order
pub trait StreamEncryptor: Send {
    /// Encrypt `plaintext` and append the output to `out`
    fn update(&mut self, plaintext: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Flush whatever closes the stream into `out`
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Produces secrets and the encrypt transform keyed by them
pub trait CipherFactory: Send + Sync {
    /// Fresh key material for one file
    fn generate_secret(&self) -> CipherSecret {
        CipherSecret::generate()
    }

    /// Build an encryptor keyed by `secret`
    fn encryptor(&self, secret: &CipherSecret) -> Result<Box<dyn StreamEncryptor>>;
}

/// Default cipher: framed ChaCha20-Poly1305
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaFrameCipher;

impl ChaChaFrameCipher {
    pub fn new() -> Self {
        Self
    }

    /// Decrypt a complete framed stream back into plaintext
    pub fn decrypt(&self, secret: &CipherSecret, mut input: &[u8]) -> Result<Vec<u8>> {
        let aead = new_aead(secret)?;
        let mut plaintext = Vec::with_capacity(input.len());
        let mut counter = 0u64;

        while !input.is_empty() {
            if input.len() < LEN_PREFIX {
                return Err(UploaderError::cipher_error("truncated frame header"));
            }
            let mut len_bytes = [0u8; LEN_PREFIX];
            len_bytes.copy_from_slice(&input[..LEN_PREFIX]);
            let frame_len = u32::from_be_bytes(len_bytes) as usize;
            input = &input[LEN_PREFIX..];
            if input.len() < frame_len {
                return Err(UploaderError::cipher_error("truncated frame body"));
            }
            let (frame, rest) = input.split_at(frame_len);
            input = rest;

            let nonce = frame_nonce(secret, counter);
            counter += 1;

            if let Ok(chunk) = aead.decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: frame,
                    aad: DATA_FRAME_AAD,
                },
            ) {
                plaintext.extend_from_slice(&chunk);
                continue;
            }

            aead.decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: frame,
                    aad: FINAL_FRAME_AAD,
                },
            )
            .map_err(|_| UploaderError::cipher_error("frame authentication failed"))?;

            if !input.is_empty() {
                return Err(UploaderError::cipher_error("data after final frame"));
            }
            return Ok(plaintext);
        }

        Err(UploaderError::cipher_error("stream ended without final frame"))
    }
}

impl CipherFactory for ChaChaFrameCipher {
    fn encryptor(&self, secret: &CipherSecret) -> Result<Box<dyn StreamEncryptor>> {
        Ok(Box::new(ChaChaFrameEncryptor {
            aead: new_aead(secret)?,
            secret: secret.clone(),
            counter: 0,
            finished: false,
        }))
    }
}

struct ChaChaFrameEncryptor {
    aead: ChaCha20Poly1305,
    secret: CipherSecret,
    counter: u64,
    finished: bool,
}

impl ChaChaFrameEncryptor {
    fn seal(&mut self, msg: &[u8], aad: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if self.finished {
            return Err(UploaderError::cipher_error("stream already finished"));
        }

        let nonce = frame_nonce(&self.secret, self.counter);
        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), Payload { msg, aad })
            .map_err(|_| UploaderError::cipher_error("frame encryption failed"))?;
        let len = u32::try_from(sealed.len())
            .map_err(|_| UploaderError::cipher_error("frame larger than 4 GiB"))?;

        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&sealed);
        self.counter += 1;
        Ok(())
    }
}

impl StreamEncryptor for ChaChaFrameEncryptor {
    fn update(&mut self, plaintext: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if plaintext.is_empty() {
            return Ok(());
        }
        self.seal(plaintext, DATA_FRAME_AAD, out)
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.seal(&[], FINAL_FRAME_AAD, out)?;
        self.finished = true;
        Ok(())
    }
}

fn new_aead(secret: &CipherSecret) -> Result<ChaCha20Poly1305> {
    ChaCha20Poly1305::new_from_slice(secret.key())
        .map_err(|_| UploaderError::cipher_error("invalid key length"))
}

fn frame_nonce(secret: &CipherSecret, counter: u64) -> [u8; IV_LEN] {
    let mut nonce = *secret.iv();
    for (byte, c) in nonce[IV_LEN - 8..].iter_mut().zip(counter.to_be_bytes()) {
        *byte ^= c;
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_chunks(secret: &CipherSecret, chunks: &[&[u8]]) -> Vec<u8> {
        let mut encryptor = ChaChaFrameCipher::new().encryptor(secret).unwrap();
        let mut out = Vec::new();
        for chunk in chunks {
            encryptor.update(chunk, &mut out).unwrap();
        }
        encryptor.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn test_decrypt_restores_plaintext() {
        let secret = CipherSecret::generate();
        let ciphertext = encrypt_chunks(&secret, &[b"hello ", b"storage ", b"network"]);
        let plaintext = ChaChaFrameCipher::new().decrypt(&secret, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello storage network");
    }

    #[test]
    fn test_empty_stream_has_final_frame() {
        let secret = CipherSecret::generate();
        let ciphertext = encrypt_chunks(&secret, &[]);
        assert!(!ciphertext.is_empty());
        let plaintext = ChaChaFrameCipher::new().decrypt(&secret, &ciphertext).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_truncation_is_detected() {
        let secret = CipherSecret::generate();
        let ciphertext = encrypt_chunks(&secret, &[b"first", b"second"]);

        // Drop the final frame: 4-byte prefix plus a 16-byte tag.
        let truncated = &ciphertext[..ciphertext.len() - (LEN_PREFIX + 16)];
        assert!(ChaChaFrameCipher::new().decrypt(&secret, truncated).is_err());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let secret = CipherSecret::generate();
        let ciphertext = encrypt_chunks(&secret, &[b"payload"]);
        let other = CipherSecret::generate();
        assert!(ChaChaFrameCipher::new().decrypt(&other, &ciphertext).is_err());
    }

    #[test]
    fn test_update_after_finish_is_rejected() {
        let secret = CipherSecret::generate();
        let mut encryptor = ChaChaFrameCipher::new().encryptor(&secret).unwrap();
        let mut out = Vec::new();
        encryptor.finish(&mut out).unwrap();
        assert!(encryptor.update(b"late", &mut out).is_err());
    }
}
