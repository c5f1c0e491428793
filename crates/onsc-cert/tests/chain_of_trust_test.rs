//! End-to-end certificate issuance, signing and verification.
//!
//! An authority certificate is issued first; a user certificate is then built,
//! keyed, written to disk, signed by the authority and checked from the file.

use std::path::Path;
use std::sync::OnceLock;

use secrecy::SecretString;

use onsc_cert::{
    build_certificate, read_certificate, write_certificate, Certificate, FileKeySource,
    FileToken, SecretKeySource, Stage, TokenKeySource, TrustContext, User,
};
use onsc_core::{CertificateFormat, ErrorKind};
use onsc_crypto::{generate_domain_parameters, DomainParameters, DEFAULT_KEY_BITS};

fn params() -> &'static DomainParameters {
    static PARAMS: OnceLock<DomainParameters> = OnceLock::new();
    PARAMS.get_or_init(|| generate_domain_parameters(DEFAULT_KEY_BITS).unwrap())
}

fn context(format: CertificateFormat) -> TrustContext {
    TrustContext::default()
        .with_format(format)
        .with_domain_parameters(params().clone())
}

fn csa_phrase() -> SecretString {
    SecretString::from("authority pass-phrase")
}

fn hydrographer() -> User {
    User::new("A. Hydrographer", "NOAA", 42, "file:///keys/a.xml")
}

/// Issue an authority certificate whose secret key goes into `store`.
fn issue_authority(ctx: &TrustContext, store: &mut dyn SecretKeySource) -> Certificate {
    let mut csa = build_certificate(&User::new("CSA", "UNH CCOM/JHC", 1, "token:0")).unwrap();
    ctx.issue_keys(&mut csa, &csa_phrase(), store).unwrap();
    csa
}

/// Build, key and write the user certificate, then sign the copy read back from disk.
fn signed_user_certificate(
    ctx: &TrustContext,
    dir: &Path,
    authority: &Certificate,
    authority_store: &dyn SecretKeySource,
) -> std::path::PathBuf {
    let path = dir.join("user.cert");
    let mut user = build_certificate(&hydrographer()).unwrap();
    let mut user_store = FileKeySource::new(dir.join("user-seckey.xml"));
    ctx.issue_keys(&mut user, &SecretString::from("user"), &mut user_store)
        .unwrap();
    write_certificate(&path, &user, ctx.format).unwrap();

    let (mut on_disk, _) = read_certificate(&path, ctx.format).unwrap();
    assert_eq!(on_disk.stage(), Stage::KeyIssued);
    ctx.sign_certificate(&mut on_disk, authority, authority_store, &csa_phrase())
        .unwrap();
    write_certificate(&path, &on_disk, ctx.format).unwrap();
    path
}

fn scenario(format: CertificateFormat) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(format);
    let mut csa_store = FileKeySource::new(dir.path().join("csa-seckey.xml"));
    let csa = issue_authority(&ctx, &mut csa_store);

    let path = signed_user_certificate(&ctx, dir.path(), &csa, &csa_store);
    let (cert, source) = read_certificate(&path, format).unwrap();
    assert_eq!(cert.stage(), Stage::Signed);
    assert_eq!(cert.signature.as_ref().unwrap().signer, csa.user);
    assert!(ctx.verify_certificate(&cert, &source, &csa).unwrap());

    // one byte of the signed organization field
    let tampered = source.replacen("NOAA", "NOAB", 1);
    assert_ne!(tampered, source);
    assert!(!ctx.verify_certificate_source(&tampered, &csa).unwrap());
}

#[test]
fn xml_certificate_chain() {
    scenario(CertificateFormat::Xml);
}

#[test]
fn text_certificate_chain() {
    scenario(CertificateFormat::Text);
}

#[test]
fn text_signature_with_short_signer_block() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(CertificateFormat::Text);
    let mut csa_store = FileKeySource::new(dir.path().join("csa-seckey.xml"));
    let csa = issue_authority(&ctx, &mut csa_store);
    let path = signed_user_certificate(&ctx, dir.path(), &csa, &csa_store);
    let (cert, source) = read_certificate(&path, ctx.format).unwrap();

    // signer recorded by name and keysource only
    let body = &source[..source.find("signature {").unwrap()];
    let value = onsc_crypto::to_ascii(cert.signature.as_ref().unwrap().value.as_ref().unwrap());
    let short = format!(
        "{body}signature {{\n\tauth\t\t{}\n\tkeysource\t{}\n\tvalue\t\t{value}\n}}\n",
        csa.user.name, csa.user.keysource
    );
    assert!(ctx.verify_certificate_source(&short, &csa).unwrap());

    let tampered = short.replacen("NOAA", "NOAB", 1);
    assert!(!ctx.verify_certificate_source(&tampered, &csa).unwrap());
}

#[test]
fn authority_key_on_token() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(CertificateFormat::Xml);
    let mut token = TokenKeySource::new(FileToken::new(dir.path().join("csa-token.bin")));
    let csa = issue_authority(&ctx, &mut token);

    let path = signed_user_certificate(&ctx, dir.path(), &csa, &token);
    let (cert, source) = read_certificate(&path, ctx.format).unwrap();
    assert!(ctx.verify_certificate(&cert, &source, &csa).unwrap());
}

#[test]
fn other_authority_does_not_verify() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(CertificateFormat::Xml);
    let mut csa_store = FileKeySource::new(dir.path().join("csa-seckey.xml"));
    let csa = issue_authority(&ctx, &mut csa_store);
    let path = signed_user_certificate(&ctx, dir.path(), &csa, &csa_store);
    let (cert, source) = read_certificate(&path, ctx.format).unwrap();

    // same identity, different key pair
    let mut rogue_store = FileKeySource::new(dir.path().join("rogue-seckey.xml"));
    let rogue = issue_authority(&ctx, &mut rogue_store);
    assert_eq!(rogue.user, csa.user);
    assert!(!ctx.verify_certificate(&cert, &source, &rogue).unwrap());
}

#[test]
fn wrong_authority_passphrase_aborts_signing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(CertificateFormat::Xml);
    let mut csa_store = FileKeySource::new(dir.path().join("csa-seckey.xml"));
    let csa = issue_authority(&ctx, &mut csa_store);

    let mut user = build_certificate(&hydrographer()).unwrap();
    let mut user_store = FileKeySource::new(dir.path().join("user-seckey.xml"));
    ctx.issue_keys(&mut user, &SecretString::from("user"), &mut user_store)
        .unwrap();
    let before = user.clone();

    // A wrong pass-phrase almost always breaks the key structure; if it does
    // not, the resulting signature must not verify.
    match ctx.sign_certificate(&mut user, &csa, &csa_store, &SecretString::from("guess")) {
        Err(err) => {
            assert_ne!(err.kind(), ErrorKind::Io);
            assert_eq!(user, before);
        }
        Ok(()) => {
            let source = onsc_cert::serialize(&user, ctx.format).unwrap();
            assert!(!ctx.verify_certificate(&user, &source, &csa).unwrap());
        }
    }
}

#[test]
fn prototype_cannot_be_signed() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(CertificateFormat::Text);
    let mut csa_store = FileKeySource::new(dir.path().join("csa-seckey.xml"));
    let csa = issue_authority(&ctx, &mut csa_store);

    let mut proto = build_certificate(&hydrographer()).unwrap();
    let err = ctx
        .sign_certificate(&mut proto, &csa, &csa_store, &csa_phrase())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StructuralFormat);
    assert_eq!(proto.stage(), Stage::Prototype);
}
