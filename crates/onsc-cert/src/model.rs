//! Certificate records and lifecycle stages

use std::fmt;

use onsc_core::{OnscError, OnscResult};
use onsc_crypto::{Bytestream, PublicKey};

/// The only signature algorithm certificates may name.
pub const ALGORITHM: &str = "openns";

/// The only algorithm version certificates may name.
pub const VERSION: &str = "1.0";

/// Identity of a certificate holder or signer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub organization: String,
    pub id: u32,
    pub keysource: String,
}

impl User {
    pub fn new(
        name: impl Into<String>,
        organization: impl Into<String>,
        id: u32,
        keysource: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            organization: organization.into(),
            id,
            keysource: keysource.into(),
        }
    }

    /// All strings non-empty and a non-zero ID.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty()
            && !self.organization.is_empty()
            && !self.keysource.is_empty()
            && self.id != 0
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.organization.is_empty()
            && self.keysource.is_empty()
            && self.id == 0
    }

    /// Whether a signer recorded as `self` names `authority`. Name and
    /// keysource must agree; organization and id only where recorded.
    pub fn identifies(&self, authority: &User) -> bool {
        self.name == authority.name
            && self.keysource == authority.keysource
            && (self.organization.is_empty() || self.organization == authority.organization)
            && (self.id == 0 || self.id == authority.id)
    }

    pub(crate) fn require_complete(&self, role: &str) -> OnscResult<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(OnscError::StructuralFormat(format!(
                "{role} identity is incomplete (name, organization, keysource and non-zero id required)"
            )))
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> #{}", self.name, self.organization, self.id)
    }
}

/// Key bytes as carried by a certificate.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// A key bytestream, written as ASCII hex.
    Plain(Bytestream),
    /// AES-wrapped secret key ciphertext, written as raw hex ("crypthex").
    Encrypted(Vec<u8>),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Plain(bs) => f.debug_tuple("Plain").field(&bs.len()).finish(),
            KeyMaterial::Encrypted(ct) => f.debug_tuple("Encrypted").field(&ct.len()).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub is_public: bool,
    pub algorithm: String,
    pub version: String,
    pub material: KeyMaterial,
}

impl Key {
    /// An `openns`/`1.0` key record.
    pub fn new(is_public: bool, material: KeyMaterial) -> Self {
        Self {
            is_public,
            algorithm: ALGORITHM.into(),
            version: VERSION.into(),
            material,
        }
    }

    pub fn public(key: &PublicKey) -> Self {
        Self::new(true, KeyMaterial::Plain(key.bytestream().clone()))
    }

    pub fn encrypted_secret(ciphertext: Vec<u8>) -> Self {
        Self::new(false, KeyMaterial::Encrypted(ciphertext))
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.material, KeyMaterial::Encrypted(_))
    }

    pub fn is_supported(&self) -> bool {
        self.algorithm == ALGORITHM && self.version == VERSION
    }

    /// The public key this record carries.
    pub fn public_key(&self) -> OnscResult<PublicKey> {
        match (&self.material, self.is_public) {
            (KeyMaterial::Plain(bs), true) => PublicKey::from_bytestream(bs.clone()),
            _ => Err(OnscError::WrongKeyType(
                "certificate key is not a plain public key".into(),
            )),
        }
    }
}

/// Signature section: who signed, with what, and (once signed) the signature itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub signer: User,
    pub algorithm: String,
    pub version: String,
    pub value: Option<Bytestream>,
}

impl SignatureRecord {
    /// A record naming `signer`, without signature bytes yet.
    pub fn pending(signer: User) -> Self {
        Self {
            signer,
            algorithm: ALGORITHM.into(),
            version: VERSION.into(),
            value: None,
        }
    }
}

/// Lifecycle of a certificate, from prototype to authority-signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// User identity only.
    Prototype,
    /// Public key attached, no signature record.
    KeyIssued,
    /// Signer recorded, signature bytes not yet present.
    Submitted,
    /// Signature bytes present.
    Signed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prototype => "prototype",
            Stage::KeyIssued => "key-issued",
            Stage::Submitted => "submitted",
            Stage::Signed => "signed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Certificate {
    pub user: User,
    pub key: Option<Key>,
    pub signature: Option<SignatureRecord>,
}

impl Certificate {
    /// A prototype certificate for `user`: no key, no signature.
    pub fn new(user: User) -> Self {
        Self {
            user,
            key: None,
            signature: None,
        }
    }

    pub fn stage(&self) -> Stage {
        match (&self.key, &self.signature) {
            (None, _) => Stage::Prototype,
            (Some(_), None) => Stage::KeyIssued,
            (Some(_), Some(sig)) if sig.value.is_none() => Stage::Submitted,
            (Some(_), Some(_)) => Stage::Signed,
        }
    }

    /// Check the completeness `stage` requires.
    pub fn validate(&self, stage: Stage) -> OnscResult<()> {
        self.user.require_complete("certificate holder")?;
        if stage >= Stage::KeyIssued {
            let key = self.key.as_ref().ok_or_else(|| {
                OnscError::StructuralFormat(format!("{stage} certificate has no key"))
            })?;
            if !key.is_supported() {
                return Err(OnscError::StructuralFormat(format!(
                    "unsupported key algorithm {} version {}",
                    key.algorithm, key.version
                )));
            }
        }
        if stage >= Stage::Submitted {
            let sig = self.signature.as_ref().ok_or_else(|| {
                OnscError::StructuralFormat(format!("{stage} certificate has no signature section"))
            })?;
            sig.signer.require_complete("signer")?;
            if sig.algorithm != ALGORITHM || sig.version != VERSION {
                return Err(OnscError::StructuralFormat(format!(
                    "unsupported signature algorithm {} version {}",
                    sig.algorithm, sig.version
                )));
            }
            if stage == Stage::Signed && sig.value.is_none() {
                return Err(OnscError::StructuralFormat(
                    "signed certificate has no signature value".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onsc_crypto::BigUint;

    fn hydrographer() -> User {
        User::new("A. Hydrographer", "NOAA", 42, "file:///keys/a.xml")
    }

    fn dummy_key() -> Key {
        let nums: Vec<BigUint> = (1u32..=4).map(BigUint::from).collect();
        let refs: Vec<&BigUint> = nums.iter().collect();
        Key::new(true, KeyMaterial::Plain(Bytestream::pack(&refs).unwrap()))
    }

    #[test]
    fn user_completeness() {
        assert!(hydrographer().is_complete());
        assert!(!User::new("x", "y", 0, "z").is_complete());
        assert!(!User::new("", "y", 1, "z").is_complete());
        assert!(User::default().is_empty());
    }

    #[test]
    fn partial_signer_identifies_authority() {
        let csa = User::new("CSA", "UNH", 1, "hasp");
        assert!(csa.identifies(&csa));
        assert!(User::new("CSA", "", 0, "hasp").identifies(&csa));
        assert!(!User::new("CSA", "", 0, "file").identifies(&csa));
        assert!(!User::new("CSA", "", 2, "hasp").identifies(&csa));
        assert!(!User::new("CSA", "CCOM", 0, "hasp").identifies(&csa));
    }

    #[test]
    fn stages_progress() {
        let mut cert = Certificate::new(hydrographer());
        assert_eq!(cert.stage(), Stage::Prototype);
        cert.validate(Stage::Prototype).unwrap();
        assert!(cert.validate(Stage::KeyIssued).is_err());

        cert.key = Some(dummy_key());
        assert_eq!(cert.stage(), Stage::KeyIssued);
        cert.validate(Stage::KeyIssued).unwrap();

        cert.signature = Some(SignatureRecord::pending(User::new("CSA", "UNH", 1, "hasp")));
        assert_eq!(cert.stage(), Stage::Submitted);
        cert.validate(Stage::Submitted).unwrap();
        assert!(cert.validate(Stage::Signed).is_err());
    }

    #[test]
    fn unsupported_algorithm_rejected() {
        let mut cert = Certificate::new(hydrographer());
        let mut key = dummy_key();
        key.version = "2.0".into();
        cert.key = Some(key);
        assert!(matches!(
            cert.validate(Stage::KeyIssued),
            Err(OnscError::StructuralFormat(_))
        ));
    }

    #[test]
    fn incomplete_signer_rejected() {
        let mut cert = Certificate::new(hydrographer());
        cert.key = Some(dummy_key());
        cert.signature = Some(SignatureRecord::pending(User::default()));
        assert!(cert.validate(Stage::Submitted).is_err());
    }

    #[test]
    fn secret_key_is_not_public() {
        let mut key = dummy_key();
        key.is_public = false;
        assert!(matches!(key.public_key(), Err(OnscError::WrongKeyType(_))));
    }
}
