//! onsc-crypto: signing core for OpenNavigationSurface files
//!
//! Pipeline for a file signature:
//! ```text
//! file (less trailer) ‖ seq-id(LE) → SHA-1 → DSA sign → (r, s) bytestream → 1024-byte trailer
//! ```
//!
//! Secret keys at rest:
//! ```text
//! pass-phrase → SHA-256 → AES-256-CBC(key payload) → IV ‖ blocks ‖ CRC32
//! ```

pub mod bytestream;
pub mod digest;
pub mod file;
pub mod signing;
pub mod symmetric;
pub mod trailer;

pub use dsa::BigUint;

pub use bytestream::{crc32, from_ascii, length_of, to_ascii, Bytestream};
pub use digest::{digest_bytes, digest_file, Digest, DigestOptions};
pub use file::{compute_file_signature, sign_file, verify_file};
pub use signing::{
    generate_domain_parameters, generate_key_pair, generate_key_pair_from, sign_digest,
    verify_signature, DomainParameters, KeyPair, PublicKey, SecretKey, DEFAULT_KEY_BITS,
};
pub use symmetric::{decrypt_secret_key, derive_key, encrypt_secret_key, AesKey};
pub use trailer::{has_trailer, read_trailer, write_trailer, Trailer, TRAILER_LEN};

/// Size of every CRC32 field
pub const CRC_LEN: usize = 4;

/// Largest signature bytestream the system will handle
pub const MAX_SIGNATURE_LEN: usize = 518;

/// Largest key bytestream the system will handle
pub const MAX_KEY_LEN: usize = 1286;

/// AES-256 key size in bytes
pub const AES_KEY_SIZE: usize = 32;

/// AES block and IV size in bytes
pub const AES_BLOCK_SIZE: usize = 16;
