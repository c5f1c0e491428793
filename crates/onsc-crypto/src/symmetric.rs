//! Pass-phrase protection of secret keys: SHA-256 key derivation and AES-256-CBC
//!
//! Ciphertext layout:
//! ```text
//! IV(16) | CBC blocks(16 * ceil(payload_len / 16)) | CRC32(4, LE over IV and blocks)
//! ```
//! Only the key payload is encrypted; the inner CRC is regenerated on decrypt.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest as _, Sha256};
use zeroize::{Zeroize, Zeroizing};

use onsc_core::{OnscError, OnscResult};

use crate::bytestream::{crc32, length_of, Bytestream};
use crate::signing::SecretKey;
use crate::{AES_BLOCK_SIZE, AES_KEY_SIZE, CRC_LEN};

/// A 256-bit AES key derived from a pass-phrase. Zeroized on drop.
#[derive(Clone)]
pub struct AesKey {
    bytes: [u8; AES_KEY_SIZE],
}

impl AesKey {
    pub fn from_bytes(bytes: [u8; AES_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.bytes
    }

    fn cipher(&self) -> OnscResult<Aes256> {
        Aes256::new_from_slice(&self.bytes)
            .map_err(|e| OnscError::CryptoOperation(format!("AES-256 key setup: {e}")))
    }
}

impl Drop for AesKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the AES key as a single unsalted SHA-256 of the pass-phrase bytes.
///
/// Weak against dictionary attack, but existing encrypted keys depend on it.
pub fn derive_key(passphrase: &SecretString) -> AesKey {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.expose_secret().as_bytes());
    let mut bytes = [0u8; AES_KEY_SIZE];
    bytes.copy_from_slice(&hasher.finalize());
    AesKey::from_bytes(bytes)
}

/// Encrypt a secret key's payload under `key` with a random IV.
pub fn encrypt_secret_key(secret: &SecretKey, key: &AesKey) -> OnscResult<Vec<u8>> {
    let cipher = key.cipher()?;
    let payload = secret.bytestream().payload();

    let mut feedback = Zeroizing::new([0u8; AES_BLOCK_SIZE]);
    rand::thread_rng().fill_bytes(&mut feedback[..]);

    let n_blocks = payload.len().div_ceil(AES_BLOCK_SIZE);
    let mut out = Vec::with_capacity(AES_BLOCK_SIZE * (n_blocks + 1) + CRC_LEN);
    out.extend_from_slice(&feedback[..]);

    // The final partial block only disturbs as many feedback bytes as it has.
    for chunk in payload.chunks(AES_BLOCK_SIZE) {
        for (f, p) in feedback.iter_mut().zip(chunk) {
            *f ^= p;
        }
        let mut block = GenericArray::clone_from_slice(&feedback[..]);
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
        feedback.copy_from_slice(&block);
    }

    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    tracing::debug!(payload_len = payload.len(), out_len = out.len(), "encrypted secret key");
    Ok(out)
}

/// Decrypt a secret key produced by [`encrypt_secret_key`].
///
/// The transport CRC is checked before any decryption. A wrong pass-phrase is
/// not detectable by CRC and usually surfaces as a malformed bytestream.
pub fn decrypt_secret_key(ciphertext: &[u8], key: &AesKey) -> OnscResult<SecretKey> {
    let n = ciphertext.len();
    if n < 2 * AES_BLOCK_SIZE + CRC_LEN || (n - CRC_LEN) % AES_BLOCK_SIZE != 0 {
        return Err(OnscError::StructuralFormat(format!(
            "encrypted key of {n} bytes is not IV + whole blocks + CRC32"
        )));
    }
    let (body, crc_bytes) = ciphertext.split_at(n - CRC_LEN);
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let computed = crc32(body);
    if stored != computed {
        return Err(OnscError::IntegrityCheck(format!(
            "encrypted key CRC32 {stored:08X} != computed {computed:08X}"
        )));
    }

    let cipher = key.cipher()?;
    let (iv, blocks) = body.split_at(AES_BLOCK_SIZE);
    let mut feedback = [0u8; AES_BLOCK_SIZE];
    feedback.copy_from_slice(iv);
    let mut plain = Zeroizing::new(Vec::with_capacity(blocks.len()));

    for chunk in blocks.chunks_exact(AES_BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for (b, f) in block.iter_mut().zip(feedback.iter()) {
            *b ^= f;
        }
        plain.extend_from_slice(&block);
        feedback.copy_from_slice(chunk);
    }

    let len = length_of(&plain).map_err(|_| {
        OnscError::StructuralFormat("decrypted key is not a bytestream (wrong pass-phrase?)".into())
    })?;
    let bs = Bytestream::from_payload(plain[..len].to_vec())?;
    SecretKey::from_bytestream(bs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{generate_key_pair_from, tests::shared_params};
    use dsa::BigUint;
    use proptest::prelude::*;

    fn pass(p: &str) -> SecretString {
        SecretString::from(p.to_string())
    }

    #[test]
    fn derive_key_is_plain_sha256() {
        let key = derive_key(&pass("abc"));
        assert_eq!(
            hex::encode(key.as_bytes()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn roundtrip_generated_secret_key() {
        let pair = generate_key_pair_from(shared_params()).unwrap();
        let key = derive_key(&pass("hydrographic office"));
        let ct = encrypt_secret_key(&pair.secret, &key).unwrap();

        let payload_len = pair.secret.bytestream().payload().len();
        assert_eq!(ct.len(), 16 + 16 * payload_len.div_ceil(16) + 4);

        let back = decrypt_secret_key(&ct, &key).unwrap();
        assert_eq!(back.bytestream(), pair.secret.bytestream());
    }

    #[test]
    fn fresh_iv_each_time() {
        let pair = generate_key_pair_from(shared_params()).unwrap();
        let key = derive_key(&pass("p"));
        let a = encrypt_secret_key(&pair.secret, &key).unwrap();
        let b = encrypt_secret_key(&pair.secret, &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_passphrase_does_not_recover_key() {
        let pair = generate_key_pair_from(shared_params()).unwrap();
        let ct = encrypt_secret_key(&pair.secret, &derive_key(&pass("right"))).unwrap();
        match decrypt_secret_key(&ct, &derive_key(&pass("wrong"))) {
            Err(_) => {}
            Ok(k) => assert_ne!(k.bytestream(), pair.secret.bytestream()),
        }
    }

    #[test]
    fn corrupt_ciphertext_fails_crc() {
        let pair = generate_key_pair_from(shared_params()).unwrap();
        let key = derive_key(&pass("p"));
        let mut ct = encrypt_secret_key(&pair.secret, &key).unwrap();
        ct[20] ^= 0x80;
        assert!(matches!(decrypt_secret_key(&ct, &key), Err(OnscError::IntegrityCheck(_))));
    }

    #[test]
    fn bad_length_rejected() {
        let key = derive_key(&pass("p"));
        assert!(matches!(
            decrypt_secret_key(&[0u8; 37], &key),
            Err(OnscError::StructuralFormat(_))
        ));
    }

    fn small_secret(values: &[u64; 4]) -> SecretKey {
        let nums: Vec<BigUint> = values.iter().map(|v| BigUint::from(*v)).collect();
        let refs: Vec<&BigUint> = nums.iter().collect();
        SecretKey::from_bytestream(Bytestream::pack(&refs).unwrap()).unwrap()
    }

    proptest! {
        #[test]
        fn cbc_roundtrip_any_length(values in any::<[u64; 4]>(), phrase in "[ -~]{0,40}") {
            let secret = small_secret(&values);
            let key = derive_key(&pass(&phrase));
            let ct = encrypt_secret_key(&secret, &key).unwrap();
            let back = decrypt_secret_key(&ct, &key).unwrap();
            prop_assert_eq!(back.bytestream(), secret.bytestream());
        }
    }
}
