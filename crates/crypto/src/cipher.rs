//! Ledger payload cipher with ChaCha20-Poly1305 AEAD.
//!
//! Every reading is serialized to JSON and sealed before it enters a block.
//! The sealed form is `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
//! with a fresh random nonce per encryption.
//!
//! # Key Persistence
//!
//! The 32-byte key lives hex-encoded in a single file. `load_or_generate`
//! reads it if present and otherwise creates it (owner read/write only on
//! Unix). The same key must be used across restarts or archived payloads
//! become unreadable.
//!
//! Key bytes are zeroized on drop.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Key size for ChaCha20-Poly1305 (256 bits).
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305 (96 bits / 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Cipher error types.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Wrong key, truncated input or altered ciphertext
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Authentic ciphertext that does not hold the expected structure
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Invalid key file {path}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },

    #[error("Key file I/O error at {path}: {source}")]
    KeyIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for cipher operations.
pub type CipherResult<T> = Result<T, CipherError>;

/// Where the active key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Created on this start because no key file existed
    Generated,
    /// Read from an existing key file
    Loaded,
    /// Supplied directly, never persisted
    Ephemeral,
}

/// Symmetric cipher for block payloads.
pub struct LedgerCipher {
    cipher: ChaCha20Poly1305,
    origin: KeyOrigin,
    fingerprint: String,
}

impl LedgerCipher {
    /// Build a cipher from raw key bytes.
    pub fn from_key_bytes(key: &[u8; KEY_SIZE]) -> Self {
        Self::with_origin(key, KeyOrigin::Ephemeral)
    }

    /// Build a cipher over a freshly generated in-memory key.
    pub fn ephemeral() -> Self {
        let key = generate_key();
        Self::from_key_bytes(&key)
    }

    fn with_origin(key: &[u8; KEY_SIZE], origin: KeyOrigin) -> Self {
        let fingerprint = hex::encode(&blake3::hash(key).as_bytes()[..8]);
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            origin,
            fingerprint,
        }
    }

    /// Load the key at `path`, or generate and persist one if absent.
    ///
    /// A key file that exists but cannot be read or parsed is an error; it
    /// is never overwritten.
    pub fn load_or_generate(path: &Path) -> CipherResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let key = parse_key(path, &contents)?;
                warn_if_exposed(path);
                let cipher = Self::with_origin(&key, KeyOrigin::Loaded);
                info!(path = %path.display(), fingerprint = %cipher.fingerprint, "Loaded ledger key");
                Ok(cipher)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::generate_at(path),
            Err(source) => Err(CipherError::KeyIo {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn generate_at(path: &Path) -> CipherResult<Self> {
        let key_io = |source| CipherError::KeyIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(key_io)?;
        }

        let key = generate_key();
        let encoded = Zeroizing::new(hex::encode(key.as_slice()));

        // Written in full under a temporary name, then linked into place, so
        // the key path never holds a partial key
        let tmp = staging_key_path(path).map_err(key_io)?;
        if let Err(e) = write_new_key_file(&tmp, encoded.as_bytes()) {
            let _ = fs::remove_file(&tmp);
            return Err(key_io(e));
        }
        let linked = fs::hard_link(&tmp, path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {}
            // Another process created it first; use theirs
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Self::load_or_generate(path);
            }
            Err(e) => return Err(key_io(e)),
        }

        let cipher = Self::with_origin(&key, KeyOrigin::Generated);
        info!(path = %path.display(), fingerprint = %cipher.fingerprint, "Generated new ledger key");
        Ok(cipher)
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    /// Short, non-secret identifier for the active key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Seal raw bytes. Output is `nonce || ciphertext || tag`.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> CipherResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open bytes sealed by `encrypt_bytes`.
    pub fn decrypt_bytes(&self, sealed: &[u8]) -> CipherResult<Zeroizing<Vec<u8>>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Decryption(format!(
                "payload too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| CipherError::Decryption(e.to_string()))
    }

    /// Serialize a value to JSON and seal it.
    pub fn encrypt<T: Serialize>(&self, value: &T) -> CipherResult<Vec<u8>> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| CipherError::Serialization(e.to_string()))?,
        );
        self.encrypt_bytes(&plaintext)
    }

    /// Open a sealed payload and deserialize it.
    pub fn decrypt<T: DeserializeOwned>(&self, sealed: &[u8]) -> CipherResult<T> {
        let plaintext = self.decrypt_bytes(sealed)?;
        serde_json::from_slice(&plaintext).map_err(|e| CipherError::MalformedPayload(e.to_string()))
    }
}

impl std::fmt::Debug for LedgerCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerCipher")
            .field("origin", &self.origin)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

/// Hidden sibling of `path` with a random suffix
fn staging_key_path(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "key path has no file name")
    })?;
    let mut suffix = [0u8; 8];
    OsRng.fill_bytes(&mut suffix);
    Ok(path.with_file_name(format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        hex::encode(suffix)
    )))
}

fn write_new_key_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn parse_key(path: &Path, contents: &str) -> CipherResult<Zeroizing<[u8; KEY_SIZE]>> {
    let invalid = |reason: String| CipherError::InvalidKey {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = Zeroizing::new(hex::decode(contents.trim()).map_err(|e| invalid(e.to_string()))?);
    if bytes.len() != KEY_SIZE {
        return Err(invalid(format!(
            "expected {} bytes, found {}",
            KEY_SIZE,
            bytes.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(unix)]
fn warn_if_exposed(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(path = %path.display(), mode = %format!("{:o}", mode & 0o777), "Ledger key file is readable by other users");
        }
    }
}

#[cfg(not(unix))]
fn warn_if_exposed(_path: &Path) {}
