//! Per-file encryption
//!
//! Every upload job gets a fresh [`CipherSecret`]. The plaintext is piped
//! through a [`StreamEncryptor`] produced by a [`CipherFactory`] and the
//! ciphertext lands in the job's workspace, ready to be stored.

pub mod encrypt;
pub mod secret;
pub mod stream;

pub use encrypt::{encrypt_file, EncryptedFile};
pub use secret::CipherSecret;
pub use stream::{ChaChaFrameCipher, CipherFactory, StreamEncryptor};
