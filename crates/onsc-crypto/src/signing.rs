//! DSA key generation, digest signing and verification over bytestreams
//!
//! Keys are four-number bytestreams `(p, q, g, x|y)`; signatures are
//! two-number bytestreams `(r, s)`. Whether a key is public or secret is
//! carried by the Rust type, not by the encoding.

use std::fmt;

use dsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use dsa::{BigUint, Components, KeySize, SigningKey, VerifyingKey};
use onsc_core::{OnscError, OnscResult};
use zeroize::Zeroize;

use crate::bytestream::Bytestream;
use crate::digest::Digest;

/// The only modulus size whose numbers fit the 1-byte length prefix.
pub const DEFAULT_KEY_BITS: u32 = 1024;

const KEY_COUNT: u8 = 4;
const SIGNATURE_COUNT: u8 = 2;

/// DSA domain parameters `(p, q, g)`, shareable across key pairs.
#[derive(Clone)]
pub struct DomainParameters {
    components: Components,
}

impl DomainParameters {
    pub fn bits(&self) -> usize {
        self.components.p().bits()
    }
}

impl fmt::Debug for DomainParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainParameters")
            .field("p_bits", &self.components.p().bits())
            .field("q_bits", &self.components.q().bits())
            .finish()
    }
}

/// Public half of a key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    bs: Bytestream,
}

/// Secret half of a key pair. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    bs: Bytestream,
}

macro_rules! key_from_bytestream {
    ($ty:ident) => {
        impl $ty {
            /// Wrap a four-number key bytestream.
            pub fn from_bytestream(bs: Bytestream) -> OnscResult<Self> {
                if bs.count() != KEY_COUNT {
                    return Err(OnscError::BadKey(format!(
                        "key bytestream holds {} numbers, expected {KEY_COUNT}",
                        bs.count()
                    )));
                }
                Ok(Self { bs })
            }

            pub fn bytestream(&self) -> &Bytestream {
                &self.bs
            }
        }
    };
}

key_from_bytestream!(PublicKey);
key_from_bytestream!(SecretKey);

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bs.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("bs", &"[REDACTED]")
            .finish()
    }
}

/// A public/secret pair over the same domain parameters.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

/// Generate fresh DSA domain parameters. Slow: seconds, not milliseconds.
pub fn generate_domain_parameters(bits: u32) -> OnscResult<DomainParameters> {
    if bits != DEFAULT_KEY_BITS {
        return Err(OnscError::CryptoOperation(format!(
            "{bits}-bit DSA keys cannot be encoded; only {DEFAULT_KEY_BITS} is supported"
        )));
    }
    tracing::debug!(bits, "generating DSA domain parameters");
    #[allow(deprecated)]
    let components = Components::generate(&mut rand::thread_rng(), KeySize::DSA_1024_160);
    Ok(DomainParameters { components })
}

/// Generate a key pair over existing domain parameters.
pub fn generate_key_pair_from(params: &DomainParameters) -> OnscResult<KeyPair> {
    let signing = SigningKey::generate(&mut rand::thread_rng(), params.components.clone());
    let verifying = signing.verifying_key();
    let c = verifying.components();

    let public = Bytestream::pack(&[c.p(), c.q(), c.g(), verifying.y()])?;
    let secret = Bytestream::pack(&[c.p(), c.q(), c.g(), signing.x()])?;
    Ok(KeyPair {
        public: PublicKey { bs: public },
        secret: SecretKey { bs: secret },
    })
}

/// Generate domain parameters and one key pair over them.
pub fn generate_key_pair(bits: u32) -> OnscResult<KeyPair> {
    let params = generate_domain_parameters(bits)?;
    generate_key_pair_from(&params)
}

fn unpack_key(bs: &Bytestream) -> OnscResult<(Components, BigUint)> {
    let [p, q, g, value]: [BigUint; KEY_COUNT as usize] =
        bs.unpack()?.try_into().map_err(|numbers: Vec<BigUint>| {
            OnscError::BadKey(format!(
                "key bytestream holds {} numbers, expected {KEY_COUNT}",
                numbers.len()
            ))
        })?;
    let components = Components::from_components(p, q, g)
        .map_err(|_| OnscError::BadKey("invalid DSA domain parameters".into()))?;
    Ok((components, value))
}

fn signing_key(secret: &SecretKey) -> OnscResult<SigningKey> {
    let (components, x) = unpack_key(&secret.bs)?;
    if x.bits() == 0 || x >= *components.q() {
        return Err(OnscError::WrongKeyType(
            "key value is not a secret exponent in [1, q)".into(),
        ));
    }
    let y = components.g().modpow(&x, components.p());
    let verifying = VerifyingKey::from_components(components, y)
        .map_err(|_| OnscError::CryptoOperation("deriving public value from secret key".into()))?;
    SigningKey::from_components(verifying, x)
        .map_err(|_| OnscError::CryptoOperation("building DSA signing key".into()))
}

fn verifying_key(public: &PublicKey) -> OnscResult<VerifyingKey> {
    let (components, y) = unpack_key(&public.bs)?;
    if y < *components.q() {
        return Err(OnscError::WrongKeyType(
            "key value is smaller than q; secret key passed as public".into(),
        ));
    }
    VerifyingKey::from_components(components, y)
        .map_err(|_| OnscError::BadKey("invalid DSA public value".into()))
}

/// Sign a digest with a secret key, producing a two-number signature bytestream.
pub fn sign_digest(digest: &Digest, secret: &SecretKey) -> OnscResult<Bytestream> {
    let key = signing_key(secret)?;
    let sig: dsa::Signature = key
        .sign_prehash(digest.as_bytes())
        .map_err(|e| OnscError::CryptoOperation(format!("DSA sign: {e}")))?;
    Bytestream::pack(&[sig.r(), sig.s()])
}

/// Verify `signature` over `digest` with `public`.
///
/// A signature that does not match is `Ok(false)`; only malformed inputs are errors.
pub fn verify_signature(
    signature: &Bytestream,
    public: &PublicKey,
    digest: &Digest,
) -> OnscResult<bool> {
    if signature.count() != SIGNATURE_COUNT {
        return Err(OnscError::BadSignature(format!(
            "signature bytestream holds {} numbers, expected {SIGNATURE_COUNT}",
            signature.count()
        )));
    }
    let key = verifying_key(public)?;
    let [r, s]: [BigUint; SIGNATURE_COUNT as usize] =
        signature.unpack()?.try_into().map_err(|_: Vec<BigUint>| {
            OnscError::BadSignature("signature bytestream does not hold two numbers".into())
        })?;
    let sig = match dsa::Signature::from_components(r, s) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };
    let valid = key.verify_prehash(digest.as_bytes(), &sig).is_ok();
    tracing::debug!(valid, "DSA verification");
    Ok(valid)
}
