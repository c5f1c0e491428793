//! Where secret keys live between uses
//!
//! A secret key is always stored AES-wrapped under a pass-phrase. Two
//! backends: an XML secret-key file, or a small fixed-size token memory.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use secrecy::SecretString;
use tracing::debug;

use onsc_core::{OnscError, OnscResult};
use onsc_crypto::{decrypt_secret_key, derive_key, encrypt_secret_key, SecretKey};

use crate::xml::{secret_key_from_xml, secret_key_to_xml};

/// Token memory size: 248 16-bit words.
pub const TOKEN_CAPACITY: usize = 496;

const TOKEN_HEADER_LEN: usize = 2;

pub trait SecretKeySource {
    /// Unwrap the stored secret key with `passphrase`.
    fn load(&self, passphrase: &SecretString) -> OnscResult<SecretKey>;

    /// Wrap `secret` under `passphrase` and store it, replacing any previous key.
    fn store(&mut self, secret: &SecretKey, passphrase: &SecretString) -> OnscResult<()>;
}

// ── File ──────────────────────────────────────────────────────────────────

/// Secret key in an XML file holding one `crypthex` key element.
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretKeySource for FileKeySource {
    fn load(&self, passphrase: &SecretString) -> OnscResult<SecretKey> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| OnscError::io(format!("reading {}", self.path.display()), e))?;
        let ciphertext = secret_key_from_xml(&text)?;
        debug!(path = %self.path.display(), "unwrapping secret key");
        decrypt_secret_key(&ciphertext, &derive_key(passphrase))
    }

    fn store(&mut self, secret: &SecretKey, passphrase: &SecretString) -> OnscResult<()> {
        let ciphertext = encrypt_secret_key(secret, &derive_key(passphrase))?;
        fs::write(&self.path, secret_key_to_xml(&ciphertext))
            .map_err(|e| OnscError::io(format!("writing {}", self.path.display()), e))?;
        debug!(path = %self.path.display(), bytes = ciphertext.len(), "stored secret key");
        Ok(())
    }
}

// ── Token ─────────────────────────────────────────────────────────────────

/// Fixed-size block memory of a key-storage token.
pub trait KeyToken {
    fn capacity(&self) -> usize;
    fn read_block(&self, offset: usize, len: usize) -> OnscResult<Vec<u8>>;
    fn write_block(&mut self, offset: usize, bytes: &[u8]) -> OnscResult<()>;
}

fn check_range(capacity: usize, offset: usize, len: usize) -> OnscResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(OnscError::NoMemory(format!(
            "token range {offset}+{len} exceeds capacity {capacity}"
        ))),
    }
}

/// Token memory held in process; contents are lost on drop.
#[derive(Debug, Clone)]
pub struct MemoryToken {
    mem: Vec<u8>,
}

impl MemoryToken {
    pub fn new() -> Self {
        Self::with_capacity(TOKEN_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mem: vec![0; capacity],
        }
    }
}

impl Default for MemoryToken {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyToken for MemoryToken {
    fn capacity(&self) -> usize {
        self.mem.len()
    }

    fn read_block(&self, offset: usize, len: usize) -> OnscResult<Vec<u8>> {
        check_range(self.mem.len(), offset, len)?;
        Ok(self.mem[offset..offset + len].to_vec())
    }

    fn write_block(&mut self, offset: usize, bytes: &[u8]) -> OnscResult<()> {
        check_range(self.mem.len(), offset, bytes.len())?;
        self.mem[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Token memory image on disk. Missing images are created zero-filled on first write.
#[derive(Debug, Clone)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, what: &str, e: std::io::Error) -> OnscError {
        OnscError::io(format!("{what} token image {}", self.path.display()), e)
    }
}

impl KeyToken for FileToken {
    fn capacity(&self) -> usize {
        TOKEN_CAPACITY
    }

    fn read_block(&self, offset: usize, len: usize) -> OnscResult<Vec<u8>> {
        check_range(TOKEN_CAPACITY, offset, len)?;
        let mut file = fs::File::open(&self.path).map_err(|e| self.io_err("opening", e))?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| self.io_err("seeking", e))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .map_err(|e| self.io_err("reading", e))?;
        Ok(buf)
    }

    fn write_block(&mut self, offset: usize, bytes: &[u8]) -> OnscResult<()> {
        check_range(TOKEN_CAPACITY, offset, bytes.len())?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.io_err("opening", e))?;
        let len = file
            .metadata()
            .map_err(|e| self.io_err("inspecting", e))?
            .len();
        if len < TOKEN_CAPACITY as u64 {
            file.set_len(TOKEN_CAPACITY as u64)
                .map_err(|e| self.io_err("sizing", e))?;
        }
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| self.io_err("seeking", e))?;
        file.write_all(bytes)
            .map_err(|e| self.io_err("writing", e))?;
        Ok(())
    }
}

/// Secret key on a token: word 0 is the ciphertext length (LE), ciphertext follows.
#[derive(Debug, Clone)]
pub struct TokenKeySource<T: KeyToken> {
    token: T,
}

impl<T: KeyToken> TokenKeySource<T> {
    pub fn new(token: T) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &T {
        &self.token
    }
}

impl<T: KeyToken> SecretKeySource for TokenKeySource<T> {
    fn load(&self, passphrase: &SecretString) -> OnscResult<SecretKey> {
        let header = self.token.read_block(0, TOKEN_HEADER_LEN)?;
        let len = u16::from_le_bytes([header[0], header[1]]) as usize;
        if len == 0 {
            return Err(OnscError::StructuralFormat("token holds no key".into()));
        }
        if TOKEN_HEADER_LEN + len > self.token.capacity() {
            return Err(OnscError::StructuralFormat(format!(
                "token key length {len} exceeds token capacity"
            )));
        }
        let ciphertext = self.token.read_block(TOKEN_HEADER_LEN, len)?;
        debug!(bytes = len, "unwrapping secret key from token");
        decrypt_secret_key(&ciphertext, &derive_key(passphrase))
    }

    fn store(&mut self, secret: &SecretKey, passphrase: &SecretString) -> OnscResult<()> {
        let ciphertext = encrypt_secret_key(secret, &derive_key(passphrase))?;
        let capacity = self.token.capacity();
        if TOKEN_HEADER_LEN + ciphertext.len() > capacity {
            return Err(OnscError::NoMemory(format!(
                "wrapped key is {} bytes, token holds {}",
                ciphertext.len(),
                capacity - TOKEN_HEADER_LEN.min(capacity)
            )));
        }
        let len = u16::try_from(ciphertext.len())
            .map_err(|_| OnscError::NoMemory("wrapped key too long for token".into()))?;

        let mut image = vec![0u8; capacity];
        image[..TOKEN_HEADER_LEN].copy_from_slice(&len.to_le_bytes());
        image[TOKEN_HEADER_LEN..TOKEN_HEADER_LEN + ciphertext.len()].copy_from_slice(&ciphertext);
        self.token.write_block(0, &image)?;
        debug!(bytes = ciphertext.len(), "stored secret key on token");
        Ok(())
    }
}
