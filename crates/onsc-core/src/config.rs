use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OnscError, OnscResult};
use crate::types::DigestAlgorithm;

/// Top-level configuration (loaded from onsc.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OnscConfig {
    pub signing: SigningConfig,
    pub keystore: KeystoreConfig,
    pub certificate: CertificateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Digest algorithm for files and certificates (default: sha1)
    pub digest: DigestAlgorithm,
    /// DSA modulus size in bits (default: 1024)
    pub key_bits: u32,
    /// Read buffer for streaming file digests, in bytes (default: 40960)
    pub read_buffer_len: usize,
}

/// Where secret keys are kept between issuance and signing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreKind {
    /// Pass-phrase protected XML secret-key file
    #[default]
    File,
    /// Hardware key-storage token (or a file-backed image of one)
    Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub kind: KeystoreKind,
    /// XML secret-key file used when kind = "file"
    pub secret_key_file: PathBuf,
    /// Token memory image used when kind = "token"
    pub token_image: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateFormat {
    #[default]
    Xml,
    Text,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Serialization used for certificates (default: xml)
    pub format: CertificateFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            digest: DigestAlgorithm::Sha1,
            key_bits: 1024,
            read_buffer_len: 40960,
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            kind: KeystoreKind::File,
            secret_key_file: PathBuf::from("onsc-seckey.xml"),
            token_image: PathBuf::from("onsc-token.bin"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl OnscConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> OnscResult<Self> {
        let config: OnscConfig =
            toml::from_str(text).map_err(|e| OnscError::Config(format!("parsing config: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> OnscResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(OnscConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| OnscError::io(format!("reading config {}", path.display()), e))?;
        Self::from_toml(&text)
    }

    fn check(&self) -> OnscResult<()> {
        if self.signing.read_buffer_len == 0 {
            return Err(OnscError::Config("signing.read_buffer_len must be non-zero".into()));
        }
        if self.signing.key_bits == 0 {
            return Err(OnscError::Config("signing.key_bits must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[signing]
digest = "sha256"
key_bits = 1024
read_buffer_len = 8192

[keystore]
kind = "token"
secret_key_file = "/etc/onsc/csa-seckey.xml"
token_image = "/var/lib/onsc/token.bin"

[certificate]
format = "text"

[logging]
level = "debug"
format = "json"
"#;
        let config = OnscConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.signing.digest, DigestAlgorithm::Sha256);
        assert_eq!(config.signing.read_buffer_len, 8192);
        assert_eq!(config.keystore.kind, KeystoreKind::Token);
        assert_eq!(config.keystore.token_image, PathBuf::from("/var/lib/onsc/token.bin"));
        assert_eq!(config.certificate.format, CertificateFormat::Text);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = OnscConfig::from_toml("").unwrap();

        assert_eq!(config.signing.digest, DigestAlgorithm::Sha1);
        assert_eq!(config.signing.key_bits, 1024);
        assert_eq!(config.signing.read_buffer_len, 40960);
        assert_eq!(config.keystore.kind, KeystoreKind::File);
        assert_eq!(config.certificate.format, CertificateFormat::Xml);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let config = OnscConfig::from_toml("[signing]\ndigest = \"sha256\"\n").unwrap();

        assert_eq!(config.signing.digest, DigestAlgorithm::Sha256);
        assert_eq!(config.signing.key_bits, 1024);
        assert_eq!(config.keystore.secret_key_file, PathBuf::from("onsc-seckey.xml"));
    }

    #[test]
    fn test_rejects_unknown_digest() {
        let err = OnscConfig::from_toml("[signing]\ndigest = \"md5\"\n").unwrap_err();
        assert!(matches!(err, OnscError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let err = OnscConfig::from_toml("[signing]\nread_buffer_len = 0\n").unwrap_err();
        assert!(matches!(err, OnscError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OnscConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.signing.key_bits, 1024);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = OnscConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = OnscConfig::from_toml(&toml_str).unwrap();

        assert_eq!(config.signing.digest, parsed.signing.digest);
        assert_eq!(config.keystore.kind, parsed.keystore.kind);
        assert_eq!(config.logging.format, parsed.logging.format);
    }
}
