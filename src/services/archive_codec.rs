//! Archive decoding.
//!
//! [`ArchiveCodec`] turns archive bytes (plus an optional password) into the
//! archive's entries, in central-directory order. [`ZipCodec`] reads ZIP
//! archives, decrypting ZipCrypto and AES entries. Every entry is read to
//! the end so the CRC-32 (or AES authentication code) is verified: a wrong
//! password that happens to pass ZipCrypto's one-byte header check is still
//! rejected.

use crate::models::archive::ArchiveEntry;
use std::io::{Cursor, Read};
use thiserror::Error;
use zip::ZipArchive;

/// Default per-entry ceiling on uncompressed size.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not an archive, or a plain (unencrypted) entry is corrupt. No
    /// password can fix this.
    #[error("malformed archive: {0}")]
    Malformed(String),
    #[error("archive is encrypted and no password was supplied")]
    PasswordRequired,
    /// The password was refused or produced data failing the integrity check.
    #[error("password rejected: {0}")]
    Rejected(String),
}

pub trait ArchiveCodec: Send + Sync {
    fn decode(&self, bytes: &[u8], password: Option<&[u8]>)
    -> Result<Vec<ArchiveEntry>, DecodeError>;
}

#[derive(Debug, Clone)]
pub struct ZipCodec {
    max_entry_bytes: u64,
}

impl Default for ZipCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_BYTES)
    }
}

impl ZipCodec {
    pub fn new(max_entry_bytes: u64) -> Self {
        Self { max_entry_bytes }
    }
}

impl ArchiveCodec for ZipCodec {
    fn decode(
        &self,
        bytes: &[u8],
        password: Option<&[u8]>,
    ) -> Result<Vec<ArchiveEntry>, DecodeError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| DecodeError::Malformed(err.to_string()))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let encrypted = archive
                .by_index_raw(index)
                .map_err(|err| DecodeError::Malformed(err.to_string()))?
                .encrypted();

            let mut file = match (encrypted, password) {
                (false, _) => archive
                    .by_index(index)
                    .map_err(|err| DecodeError::Malformed(err.to_string()))?,
                (true, None) => return Err(DecodeError::PasswordRequired),
                (true, Some(password)) => archive
                    .by_index_decrypt(index, password)
                    .map_err(|err| DecodeError::Rejected(err.to_string()))?,
            };

            let path = file.name().to_string();
            if file.is_dir() {
                entries.push(ArchiveEntry::new(path, Vec::new()));
                continue;
            }

            let mut data = Vec::new();
            let read = (&mut file)
                .take(self.max_entry_bytes + 1)
                .read_to_end(&mut data);
            if let Err(err) = read {
                let reason = format!("{path}: {err}");
                return Err(if encrypted {
                    DecodeError::Rejected(reason)
                } else {
                    DecodeError::Malformed(reason)
                });
            }
            if data.len() as u64 > self.max_entry_bytes {
                return Err(DecodeError::Malformed(format!(
                    "{path}: entry exceeds {} bytes",
                    self.max_entry_bytes
                )));
            }
            entries.push(ArchiveEntry::new(path, data));
        }
        Ok(entries)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};
    use zip::{ZipWriter, unstable::write::FileOptionsExt, write::SimpleFileOptions};

    /// Build a ZIP in memory; entries ending in `/` become directories.
    pub fn zip(entries: &[(&str, &[u8])], password: Option<&str>) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            let options = SimpleFileOptions::default();
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
                continue;
            }
            let options = match password {
                Some(pw) => options.with_deprecated_encryption(pw.as_bytes()),
                None => options,
            };
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}
