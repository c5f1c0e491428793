use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally assigned integer that links a file signature to a metadata record.
///
/// Stored in cleartext in the file trailer and bound into the digest as its
/// four little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceId(pub u32);

impl SequenceId {
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl From<u32> for SequenceId {
    fn from(value: u32) -> Self {
        SequenceId(value)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Content digest used for file and certificate signatures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// 20-byte SHA-1, the wire-compatible default
    #[default]
    Sha1,
    /// 32-byte SHA-256
    Sha256,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha1 => f.write_str("sha1"),
            DigestAlgorithm::Sha256 => f.write_str("sha256"),
        }
    }
}
