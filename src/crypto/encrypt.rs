//! Encryption stage: plaintext file in, ciphertext file out

use crate::crypto::secret::CipherSecret;
use crate::crypto::stream::CipherFactory;
use crate::error::{Result, UploaderError};
use crate::watchdog::AbortSignal;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ciphertext produced for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFile {
    pub path: PathBuf,
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
    /// Hex SHA-256 of the ciphertext
    pub sha256: String,
}

/// Pipe `source` through an encryptor keyed by `secret` into `destination`
///
/// Runs on the blocking pool. The abort flag is checked after every chunk
/// write, so a session abort stops the stage at the next chunk boundary.
pub async fn encrypt_file(
    cipher: Arc<dyn CipherFactory>,
    secret: CipherSecret,
    source: &Path,
    destination: &Path,
    chunk_size: usize,
    abort: AbortSignal,
) -> Result<EncryptedFile> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();

    tokio::task::spawn_blocking(move || {
        if chunk_size == 0 {
            return Err(UploaderError::config_error(
                "chunk-size",
                "Chunk size must be greater than 0",
            ));
        }

        let mut encryptor = cipher.encryptor(&secret)?;

        let mut reader = File::open(&source).map_err(|e| {
            UploaderError::workspace_error(format!("Unable to open {}", source.display()), e)
        })?;
        let out_file = File::create(&destination).map_err(|e| {
            let message = format!("Unable to create {}", destination.display());
            UploaderError::workspace_error(message, e)
        })?;
        let write_failed = |e| {
            let message = format!("Unable to write {}", destination.display());
            UploaderError::workspace_error(message, e)
        };
        let mut writer = BufWriter::new(out_file);

        let mut buffer = vec![0u8; chunk_size];
        let mut sealed = Vec::with_capacity(chunk_size + 64);
        let mut hasher = Sha256::new();
        let mut plaintext_bytes = 0u64;
        let mut ciphertext_bytes = 0u64;

        let mut write_sealed = |sealed: &mut Vec<u8>, writer: &mut BufWriter<File>| {
            hasher.update(&sealed[..]);
            ciphertext_bytes += sealed.len() as u64;
            let written = writer.write_all(sealed);
            sealed.clear();
            written
        };

        loop {
            let n = reader.read(&mut buffer).map_err(|e| {
                UploaderError::workspace_error(format!("Unable to read {}", source.display()), e)
            })?;
            if n == 0 {
                break;
            }
            plaintext_bytes += n as u64;

            encryptor.update(&buffer[..n], &mut sealed)?;
            write_sealed(&mut sealed, &mut writer).map_err(write_failed)?;

            if abort.is_raised() {
                return Err(UploaderError::aborted_error("encryption"));
            }
        }

        encryptor.finish(&mut sealed)?;
        write_sealed(&mut sealed, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(write_failed)?;

        Ok(EncryptedFile {
            path: destination,
            plaintext_bytes,
            ciphertext_bytes,
            sha256: hex::encode(hasher.finalize()),
        })
    })
    .await?
}
