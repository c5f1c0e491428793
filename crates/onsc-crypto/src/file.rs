//! Sign and verify target files through their embedded trailer

use std::path::Path;

use onsc_core::{OnscResult, SequenceId};

use crate::bytestream::Bytestream;
use crate::digest::{digest_file, DigestOptions};
use crate::signing::{sign_digest, verify_signature, PublicKey, SecretKey};
use crate::trailer::{read_trailer, write_trailer};

/// Signature over `path` (less any trailer) bound to `id`, without writing it.
pub fn compute_file_signature(
    path: &Path,
    secret: &SecretKey,
    id: SequenceId,
    options: &DigestOptions,
) -> OnscResult<Bytestream> {
    let digest = digest_file(path, &id.to_le_bytes(), options)?;
    sign_digest(&digest, secret)
}

/// Sign `path` and write (or replace) its trailer. Returns the signature written.
pub fn sign_file(
    path: &Path,
    secret: &SecretKey,
    id: SequenceId,
    options: &DigestOptions,
) -> OnscResult<Bytestream> {
    let signature = compute_file_signature(path, secret, id, options)?;
    write_trailer(path, &signature, id)?;
    tracing::info!(path = %path.display(), sequence_id = %id, "signed file");
    Ok(signature)
}

/// Check the trailer of `path` against `public` and the expected sequence ID.
///
/// A file without a trailer is `NoSignatureFound`; a trailer whose ID differs
/// from `id`, or whose signature does not match, is `Ok(false)`.
pub fn verify_file(
    path: &Path,
    public: &PublicKey,
    id: SequenceId,
    options: &DigestOptions,
) -> OnscResult<bool> {
    let trailer = read_trailer(path)?;
    if trailer.sequence_id != id {
        tracing::debug!(
            path = %path.display(),
            stored = %trailer.sequence_id,
            expected = %id,
            "sequence ID mismatch"
        );
        return Ok(false);
    }
    let digest = digest_file(path, &id.to_le_bytes(), options)?;
    verify_signature(&trailer.signature, public, &digest)
}
