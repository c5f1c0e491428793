//! ONSCryptoBlock: the fixed 1024-byte signature trailer at the end of a signed file
//!
//! ```text
//! offset  size  field
//! 0       4     magic 0x4F4E5343 (LE)
//! 4       1     version (1)
//! 5       4     sequence ID (LE)
//! 9       len   signature payload (no inner CRC)
//! 9+len   4     CRC32 over [5, 9+len) (LE)
//! ...           zero pad to 1024
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use onsc_core::{OnscError, OnscResult, SequenceId};

use crate::bytestream::{crc32, length_of, Bytestream};
use crate::CRC_LEN;

pub const TRAILER_LEN: usize = 1024;
pub const TRAILER_MAGIC: u32 = 0x4F4E_5343;
pub const TRAILER_VERSION: u8 = 1;

const MAGIC_OFF: usize = 0;
const VERSION_OFF: usize = 4;
const SEQ_ID_OFF: usize = 5;
const SIG_OFF: usize = 9;

/// Contents of a validated trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    pub signature: Bytestream,
    pub sequence_id: SequenceId,
}

fn read_u32(block: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([block[off], block[off + 1], block[off + 2], block[off + 3]])
}

/// Check for the trailer magic at `len - 1024` and rewind to the start.
pub(crate) fn probe<R: Read + Seek>(reader: &mut R, len: u64) -> io::Result<bool> {
    if len < TRAILER_LEN as u64 {
        reader.seek(SeekFrom::Start(0))?;
        return Ok(false);
    }
    reader.seek(SeekFrom::Start(len - TRAILER_LEN as u64))?;
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(u32::from_le_bytes(magic) == TRAILER_MAGIC)
}

/// Build a trailer block for `signature` and `id`.
pub fn encode_block(signature: &Bytestream, id: SequenceId) -> OnscResult<Vec<u8>> {
    let payload = signature.payload();
    if SIG_OFF + payload.len() + CRC_LEN > TRAILER_LEN {
        return Err(OnscError::NoMemory(format!(
            "{}-byte signature does not fit a {TRAILER_LEN}-byte trailer",
            payload.len()
        )));
    }
    let mut block = vec![0u8; TRAILER_LEN];
    block[MAGIC_OFF..MAGIC_OFF + 4].copy_from_slice(&TRAILER_MAGIC.to_le_bytes());
    block[VERSION_OFF] = TRAILER_VERSION;
    block[SEQ_ID_OFF..SIG_OFF].copy_from_slice(&id.to_le_bytes());
    let crc_off = SIG_OFF + payload.len();
    block[SIG_OFF..crc_off].copy_from_slice(payload);
    let crc = crc32(&block[SEQ_ID_OFF..crc_off]);
    block[crc_off..crc_off + CRC_LEN].copy_from_slice(&crc.to_le_bytes());
    Ok(block)
}

/// Validate a trailer block and recover its signature and sequence ID.
///
/// `name` only labels errors.
pub fn decode_block(block: &[u8], name: &str) -> OnscResult<Trailer> {
    if block.len() != TRAILER_LEN || read_u32(block, MAGIC_OFF) != TRAILER_MAGIC {
        return Err(OnscError::NoSignatureFound(name.to_string()));
    }
    let version = block[VERSION_OFF];
    if version != TRAILER_VERSION {
        return Err(OnscError::BadSignatureBlock(format!(
            "{name}: trailer version {version}, expected {TRAILER_VERSION}"
        )));
    }
    // Leave room for the block CRC when walking the embedded signature.
    let sig_area = &block[SIG_OFF..TRAILER_LEN - CRC_LEN];
    let sig_len = length_of(sig_area)
        .map_err(|e| OnscError::BadSignatureBlock(format!("{name}: {e}")))?;
    let crc_off = SIG_OFF + sig_len;
    let stored = read_u32(block, crc_off);
    let computed = crc32(&block[SEQ_ID_OFF..crc_off]);
    if stored != computed {
        return Err(OnscError::IntegrityCheck(format!(
            "{name}: trailer CRC32 {stored:08X} != computed {computed:08X}"
        )));
    }
    let signature = Bytestream::from_payload(block[SIG_OFF..crc_off].to_vec())?;
    let sequence_id = SequenceId(read_u32(block, SEQ_ID_OFF));
    Ok(Trailer {
        signature,
        sequence_id,
    })
}

/// Whether `path` ends in a trailer. Says nothing about its validity.
pub fn has_trailer(path: &Path) -> OnscResult<bool> {
    let mut file = File::open(path)
        .map_err(|e| OnscError::io(format!("opening {} for trailer check", path.display()), e))?;
    let len = file
        .metadata()
        .map_err(|e| OnscError::io(format!("stat {}", path.display()), e))?
        .len();
    probe(&mut file, len)
        .map_err(|e| OnscError::io(format!("reading trailer magic of {}", path.display()), e))
}

/// Read and validate the trailer of `path`.
pub fn read_trailer(path: &Path) -> OnscResult<Trailer> {
    let name = path.display().to_string();
    let mut file = File::open(path)
        .map_err(|e| OnscError::io(format!("opening {name} for trailer read"), e))?;
    let len = file
        .metadata()
        .map_err(|e| OnscError::io(format!("stat {name}"), e))?
        .len();
    if len < TRAILER_LEN as u64 {
        return Err(OnscError::NoSignatureFound(name));
    }
    let mut block = vec![0u8; TRAILER_LEN];
    file.seek(SeekFrom::Start(len - TRAILER_LEN as u64))
        .and_then(|_| file.read_exact(&mut block))
        .map_err(|e| OnscError::io(format!("reading trailer of {name}"), e))?;
    let trailer = decode_block(&block, &name)?;
    tracing::debug!(path = %name, sequence_id = %trailer.sequence_id, "read trailer");
    Ok(trailer)
}

/// Write a trailer for `signature` and `id`, overwriting an existing one in place
/// or appending a new block.
pub fn write_trailer(path: &Path, signature: &Bytestream, id: SequenceId) -> OnscResult<()> {
    let name = path.display().to_string();
    let block = encode_block(signature, id)?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| OnscError::io(format!("opening {name} for trailer write"), e))?;
    let len = file
        .metadata()
        .map_err(|e| OnscError::io(format!("stat {name}"), e))?
        .len();
    let existing =
        probe(&mut file, len).map_err(|e| OnscError::io(format!("probing {name}"), e))?;
    let offset = if existing { len - TRAILER_LEN as u64 } else { len };
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.write_all(&block))
        .and_then(|_| file.flush())
        .map_err(|e| OnscError::io(format!("writing trailer to {name}"), e))?;
    tracing::debug!(path = %name, sequence_id = %id, overwrite = existing, "wrote trailer");
    Ok(())
}
