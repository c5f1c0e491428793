//! Content digests of target files, excluding any signature trailer
//!
//! Auxiliary data (the sequence ID) is fed after the content so that the ID
//! stored in cleartext in the trailer cannot be swapped without invalidating
//! the signature.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use onsc_core::config::SigningConfig;
use onsc_core::{DigestAlgorithm, OnscError, OnscResult};
use sha2::Digest as _;

use crate::trailer::{self, TRAILER_LEN};

/// Default streaming buffer for file digests.
pub const DEFAULT_READ_BUFFER_LEN: usize = 40960;

/// A computed content digest. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, hex::encode(&self.bytes))
    }
}

/// Algorithm and buffering for [`digest_file`]
#[derive(Debug, Clone, Copy)]
pub struct DigestOptions {
    pub algorithm: DigestAlgorithm,
    pub read_buffer_len: usize,
}

impl Default for DigestOptions {
    fn default() -> Self {
        Self {
            algorithm: DigestAlgorithm::Sha1,
            read_buffer_len: DEFAULT_READ_BUFFER_LEN,
        }
    }
}

impl From<&SigningConfig> for DigestOptions {
    fn from(config: &SigningConfig) -> Self {
        Self {
            algorithm: config.digest,
            read_buffer_len: config.read_buffer_len,
        }
    }
}

enum Hasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self, algorithm: DigestAlgorithm) -> Digest {
        let bytes = match self {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
        };
        Digest { algorithm, bytes }
    }
}

/// Digest an in-memory buffer followed by `aux`.
pub fn digest_bytes(data: &[u8], aux: &[u8], algorithm: DigestAlgorithm) -> Digest {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.update(aux);
    hasher.finalize(algorithm)
}

/// Digest a file, skipping its final 1024 bytes when they hold a signature trailer.
pub fn digest_file(path: &Path, aux: &[u8], options: &DigestOptions) -> OnscResult<Digest> {
    let mut file = File::open(path)
        .map_err(|e| OnscError::io(format!("opening {} for digest", path.display()), e))?;
    let len = file
        .metadata()
        .map_err(|e| OnscError::io(format!("stat {}", path.display()), e))?
        .len();
    let has_trailer = trailer::probe(&mut file, len)
        .map_err(|e| OnscError::io(format!("probing {} for trailer", path.display()), e))?;
    let active_len = if has_trailer { len - TRAILER_LEN as u64 } else { len };

    tracing::debug!(
        path = %path.display(),
        active_len,
        has_trailer,
        algorithm = %options.algorithm,
        "computing file digest"
    );

    let mut hasher = Hasher::new(options.algorithm);
    let mut buf = vec![0u8; options.read_buffer_len.max(1)];
    let mut reader = file.take(active_len);
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| OnscError::io(format!("reading {} for digest", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    hasher.update(aux);
    Ok(hasher.finalize(options.algorithm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[test]
    fn digest_lengths_follow_algorithm() {
        assert_eq!(digest_bytes(b"abc", &[], DigestAlgorithm::Sha1).as_bytes().len(), 20);
        assert_eq!(digest_bytes(b"abc", &[], DigestAlgorithm::Sha256).as_bytes().len(), 32);
    }

    #[test]
    fn sha1_known_answer() {
        let d = digest_bytes(b"ab", b"c", DigestAlgorithm::Sha1);
        assert_eq!(hex::encode(d.as_bytes()), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn aux_changes_digest() {
        let a = digest_bytes(b"grid", &7u32.to_le_bytes(), DigestAlgorithm::Sha1);
        let b = digest_bytes(b"grid", &8u32.to_le_bytes(), DigestAlgorithm::Sha1);
        assert_ne!(a, b);
    }

    #[test]
    fn file_digest_matches_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let path = write_temp(&dir, "grid.bag", &data);
        let options = DigestOptions {
            algorithm: DigestAlgorithm::Sha256,
            read_buffer_len: 4096,
        };
        let from_file = digest_file(&path, b"aux", &options).unwrap();
        assert_eq!(from_file, digest_bytes(&data, b"aux", DigestAlgorithm::Sha256));
    }

    #[test]
    fn file_digest_skips_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![0x5Au8; 3000];
        let mut with_trailer = data.clone();
        let mut block = vec![0u8; TRAILER_LEN];
        block[..4].copy_from_slice(&trailer::TRAILER_MAGIC.to_le_bytes());
        with_trailer.extend_from_slice(&block);

        let plain = write_temp(&dir, "plain.bag", &data);
        let signed = write_temp(&dir, "signed.bag", &with_trailer);
        let options = DigestOptions::default();
        assert_eq!(
            digest_file(&plain, &[], &options).unwrap(),
            digest_file(&signed, &[], &options).unwrap()
        );
    }

    #[test]
    fn short_file_has_no_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "tiny.bag", b"tiny");
        let d = digest_file(&path, &[], &DigestOptions::default()).unwrap();
        assert_eq!(d, digest_bytes(b"tiny", &[], DigestAlgorithm::Sha1));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = digest_file(&dir.path().join("absent"), &[], &DigestOptions::default()).unwrap_err();
        assert_eq!(err.kind(), onsc_core::ErrorKind::Io);
    }

    proptest! {
        #[test]
        fn digest_is_deterministic(data in prop::collection::vec(any::<u8>(), 0..4096), aux in any::<u32>()) {
            let a = digest_bytes(&data, &aux.to_le_bytes(), DigestAlgorithm::Sha1);
            let b = digest_bytes(&data, &aux.to_le_bytes(), DigestAlgorithm::Sha1);
            prop_assert_eq!(a, b);
        }
    }
}
