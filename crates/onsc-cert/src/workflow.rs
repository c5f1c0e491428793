//! Chain-of-trust operations
//!
//! Certificates are signed over their own serialized form with the signature
//! payload removed, so the authority signs exactly the bytes a verifier will
//! later re-derive from the file on disk. Every operation either completes or
//! leaves its inputs untouched; failures carry the step that failed.

use std::fs;
use std::path::Path;

use secrecy::SecretString;
use tracing::{debug, info};

use onsc_core::{
    CertificateFormat, DigestAlgorithm, OnscConfig, OnscError, OnscResult, SequenceId, StepContext,
};
use onsc_crypto::{
    digest_bytes, generate_key_pair, generate_key_pair_from, sign_digest, verify_signature,
    Bytestream, Digest, DigestOptions, DomainParameters, PublicKey,
};

use crate::keystore::SecretKeySource;
use crate::model::{Certificate, Key, SignatureRecord, Stage, User};
use crate::{text, xml};

pub fn serialize(cert: &Certificate, format: CertificateFormat) -> OnscResult<String> {
    match format {
        CertificateFormat::Xml => Ok(xml::to_xml(cert)),
        CertificateFormat::Text => text::to_text(cert),
    }
}

pub fn parse(source: &str, format: CertificateFormat) -> OnscResult<Certificate> {
    match format {
        CertificateFormat::Xml => xml::from_xml(source),
        CertificateFormat::Text => text::from_text(source),
    }
}

/// Digest of a serialized certificate with its signature payload removed.
pub fn signing_digest(
    source: &str,
    format: CertificateFormat,
    algorithm: DigestAlgorithm,
) -> Digest {
    let stripped = match format {
        CertificateFormat::Xml => xml::strip_sigstream(source),
        CertificateFormat::Text => text::strip_signature(source),
    };
    digest_bytes(stripped.as_bytes(), &[], algorithm)
}

/// Read and parse a certificate, returning it with the text it was parsed from.
pub fn read_certificate(
    path: &Path,
    format: CertificateFormat,
) -> OnscResult<(Certificate, String)> {
    let source = fs::read_to_string(path)
        .map_err(|e| OnscError::io(format!("reading {}", path.display()), e))?;
    let cert = parse(&source, format)?;
    Ok((cert, source))
}

pub fn write_certificate(
    path: &Path,
    cert: &Certificate,
    format: CertificateFormat,
) -> OnscResult<()> {
    let source = serialize(cert, format)?;
    fs::write(path, source).map_err(|e| OnscError::io(format!("writing {}", path.display()), e))
}

/// A prototype certificate for `user`.
pub fn build_certificate(user: &User) -> OnscResult<Certificate> {
    let cert = Certificate::new(user.clone());
    cert.validate(Stage::Prototype).at_step("build certificate")?;
    Ok(cert)
}

fn public_key_of(cert: &Certificate) -> OnscResult<PublicKey> {
    cert.key
        .as_ref()
        .ok_or_else(|| OnscError::WrongKeyType(format!("certificate of {} has no key", cert.user)))?
        .public_key()
}

/// Settings shared by the trust operations.
#[derive(Debug, Clone)]
pub struct TrustContext {
    pub digest: DigestOptions,
    pub key_bits: u32,
    pub format: CertificateFormat,
    params: Option<DomainParameters>,
}

impl Default for TrustContext {
    fn default() -> Self {
        Self::from_config(&OnscConfig::default())
    }
}

impl TrustContext {
    pub fn from_config(config: &OnscConfig) -> Self {
        Self {
            digest: DigestOptions::from(&config.signing),
            key_bits: config.signing.key_bits,
            format: config.certificate.format,
            params: None,
        }
    }

    /// Issue keys over fixed domain parameters instead of generating new ones per pair.
    pub fn with_domain_parameters(mut self, params: DomainParameters) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_format(mut self, format: CertificateFormat) -> Self {
        self.format = format;
        self
    }

    /// Generate a key pair for `cert`, protect the secret half in `store`, and
    /// attach the public half. Any existing signature is dropped.
    pub fn issue_keys(
        &self,
        cert: &mut Certificate,
        passphrase: &SecretString,
        store: &mut dyn SecretKeySource,
    ) -> OnscResult<()> {
        cert.validate(Stage::Prototype)
            .at_step("issue keys: check certificate")?;
        let pair = match &self.params {
            Some(params) => generate_key_pair_from(params),
            None => generate_key_pair(self.key_bits),
        }
        .at_step("issue keys: generate key pair")?;
        store
            .store(&pair.secret, passphrase)
            .at_step("issue keys: protect secret key")?;

        cert.key = Some(Key::public(&pair.public));
        cert.signature = None;
        info!(user = %cert.user, "issued keys");
        Ok(())
    }

    /// Sign `user_cert` as `authority`, whose secret key is in `source`.
    pub fn sign_certificate(
        &self,
        user_cert: &mut Certificate,
        authority: &Certificate,
        source: &dyn SecretKeySource,
        passphrase: &SecretString,
    ) -> OnscResult<()> {
        authority
            .validate(Stage::KeyIssued)
            .at_step("sign certificate: check authority")?;

        let mut blank = user_cert.clone();
        blank.signature = Some(SignatureRecord::pending(authority.user.clone()));
        blank
            .validate(Stage::Submitted)
            .at_step("sign certificate: check certificate")?;

        let serialized =
            serialize(&blank, self.format).at_step("sign certificate: serialize")?;
        let digest = signing_digest(&serialized, self.format, self.digest.algorithm);

        let secret = source
            .load(passphrase)
            .at_step("sign certificate: load authority key")?;
        let value = sign_digest(&digest, &secret).at_step("sign certificate: sign")?;

        if let Some(sig) = blank.signature.as_mut() {
            sig.value = Some(value);
        }
        *user_cert = blank;
        info!(user = %user_cert.user, authority = %authority.user, "signed certificate");
        Ok(())
    }

    /// Check that `user_cert`, serialized as `source`, was signed by `authority`.
    ///
    /// Unsigned certificates, and certificates whose recorded signer is not
    /// `authority`, are `Ok(false)`.
    pub fn verify_certificate(
        &self,
        user_cert: &Certificate,
        source: &str,
        authority: &Certificate,
    ) -> OnscResult<bool> {
        let Some(sig) = &user_cert.signature else {
            debug!(user = %user_cert.user, "certificate is unsigned");
            return Ok(false);
        };
        let Some(value) = &sig.value else {
            debug!(user = %user_cert.user, "certificate signature is pending");
            return Ok(false);
        };
        if !sig.signer.identifies(&authority.user) {
            debug!(signer = %sig.signer, authority = %authority.user, "signer is not this authority");
            return Ok(false);
        }

        let public = public_key_of(authority).at_step("verify certificate: authority key")?;
        let digest = signing_digest(source, self.format, self.digest.algorithm);
        verify_signature(value, &public, &digest).at_step("verify certificate: verify")
    }

    /// Parse `source` and verify it against `authority`.
    pub fn verify_certificate_source(
        &self,
        source: &str,
        authority: &Certificate,
    ) -> OnscResult<bool> {
        let cert = parse(source, self.format).at_step("verify certificate: parse")?;
        self.verify_certificate(&cert, source, authority)
    }

    /// Sign `path` in place with the key in `source`, bound to `id`.
    pub fn sign_file(
        &self,
        path: &Path,
        source: &dyn SecretKeySource,
        passphrase: &SecretString,
        id: SequenceId,
    ) -> OnscResult<Bytestream> {
        let secret = source
            .load(passphrase)
            .at_step("sign file: load secret key")?;
        onsc_crypto::sign_file(path, &secret, id, &self.digest).at_step("sign file: write trailer")
    }

    /// Check the signature embedded in `path` against `signer`'s public key.
    pub fn verify_file(
        &self,
        path: &Path,
        signer: &Certificate,
        id: SequenceId,
    ) -> OnscResult<bool> {
        let public = public_key_of(signer).at_step("verify file: signer key")?;
        onsc_crypto::verify_file(path, &public, id, &self.digest).at_step("verify file: check trailer")
    }
}
