//! Internal numeric bytestream and its ASCII wire form
//!
//! Binary layout:
//! ```text
//! count(1) | len(1) magnitude(len) | ... (count times) | CRC32(4, LE over everything before)
//! ```
//! ASCII layout: uppercase hex of the binary bytestream (payload and inner
//! CRC) followed by eight hex digits of the CRC32 of that hex text.

use std::fmt;

use dsa::BigUint;
use onsc_core::{OnscError, OnscResult};
use zeroize::{Zeroize, Zeroizing};

use crate::CRC_LEN;

/// CRC32 used for every checksum in the system.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Bounds-checked reader over the length-prefixed numbers of a bytestream.
struct NumberWalk<'a> {
    data: &'a [u8],
    remaining: u8,
    pos: usize,
}

impl<'a> NumberWalk<'a> {
    fn new(data: &'a [u8]) -> OnscResult<Self> {
        let count = *data
            .first()
            .ok_or_else(|| OnscError::StructuralFormat("empty bytestream".into()))?;
        Ok(Self {
            data,
            remaining: count,
            pos: 1,
        })
    }

    fn next_number(&mut self) -> OnscResult<Option<&'a [u8]>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let len = *self.data.get(self.pos).ok_or_else(|| {
            OnscError::StructuralFormat(format!("length byte missing at offset {}", self.pos))
        })? as usize;
        let start = self.pos + 1;
        let end = start + len;
        let magnitude = self.data.get(start..end).ok_or_else(|| {
            OnscError::StructuralFormat(format!(
                "number of {len} bytes at offset {start} overruns {} byte buffer",
                self.data.len()
            ))
        })?;
        self.pos = end;
        self.remaining -= 1;
        Ok(Some(magnitude))
    }
}

/// Length of the bytestream at the start of `data`, excluding its trailing CRC.
///
/// Walks the count and length prefixes without trusting them: any prefix that
/// points past the end of `data` is a `StructuralFormat` error.
pub fn length_of(data: &[u8]) -> OnscResult<usize> {
    let mut walk = NumberWalk::new(data)?;
    while walk.next_number()?.is_some() {}
    Ok(walk.pos)
}

/// A validated bytestream: structurally sound payload followed by a matching CRC32.
#[derive(Clone, PartialEq, Eq, Zeroize)]
pub struct Bytestream {
    bytes: Vec<u8>,
}

impl Bytestream {
    /// Frame `payload` (count plus numbers, no CRC) and append its CRC32.
    pub fn from_payload(mut payload: Vec<u8>) -> OnscResult<Self> {
        let len = length_of(&payload)?;
        if len != payload.len() {
            return Err(OnscError::StructuralFormat(format!(
                "{} trailing bytes after bytestream payload",
                payload.len() - len
            )));
        }
        let crc = crc32(&payload);
        payload.extend_from_slice(&crc.to_le_bytes());
        Ok(Self { bytes: payload })
    }

    /// Validate a complete bytestream (payload and inner CRC).
    pub fn from_bytes(bytes: Vec<u8>) -> OnscResult<Self> {
        let len = length_of(&bytes)?;
        if bytes.len() != len + CRC_LEN {
            return Err(OnscError::StructuralFormat(format!(
                "bytestream is {} bytes, structure says {}",
                bytes.len(),
                len + CRC_LEN
            )));
        }
        let stored = u32::from_le_bytes([bytes[len], bytes[len + 1], bytes[len + 2], bytes[len + 3]]);
        let computed = crc32(&bytes[..len]);
        if stored != computed {
            return Err(OnscError::IntegrityCheck(format!(
                "bytestream CRC32 {stored:08X} != computed {computed:08X}"
            )));
        }
        Ok(Self { bytes })
    }

    /// Pack big-endian unsigned integers.
    ///
    /// Each number takes `ceil(bits/8)` bytes, plus a leading zero byte when
    /// `bits` is a multiple of eight; zero is a single `0x00`. Numbers that
    /// need more than 255 bytes cannot be represented.
    pub fn pack(numbers: &[&BigUint]) -> OnscResult<Self> {
        let count = u8::try_from(numbers.len())
            .map_err(|_| OnscError::StructuralFormat(format!("{} numbers in one bytestream", numbers.len())))?;
        let mut payload = vec![count];
        for n in numbers {
            let bits = n.bits();
            let len = (bits + 7) / 8 + usize::from(bits % 8 == 0);
            let len_byte = u8::try_from(len).map_err(|_| {
                OnscError::StructuralFormat(format!("{bits}-bit number does not fit a 255-byte field"))
            })?;
            let magnitude = Zeroizing::new(n.to_bytes_be());
            payload.push(len_byte);
            payload.resize(payload.len() + len.saturating_sub(magnitude.len()), 0);
            payload.extend_from_slice(&magnitude);
        }
        Self::from_payload(payload)
    }

    /// Unpack every number, in order.
    pub fn unpack(&self) -> OnscResult<Vec<BigUint>> {
        let mut walk = NumberWalk::new(self.payload())?;
        let mut out = Vec::with_capacity(self.count() as usize);
        while let Some(magnitude) = walk.next_number()? {
            out.push(BigUint::from_bytes_be(magnitude));
        }
        Ok(out)
    }

    /// Number of integers in the stream.
    pub fn count(&self) -> u8 {
        self.bytes[0]
    }

    /// Count and numbers, without the CRC.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - CRC_LEN]
    }

    pub fn crc(&self) -> u32 {
        let n = self.bytes.len();
        u32::from_le_bytes([self.bytes[n - 4], self.bytes[n - 3], self.bytes[n - 2], self.bytes[n - 1]])
    }

    /// Full binary form: payload followed by CRC32.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Bytestream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bytestream")
            .field("count", &self.count())
            .field("len", &self.bytes.len())
            .field("crc", &format_args!("{:08X}", self.crc()))
            .finish()
    }
}

/// Encode a bytestream in its ASCII wire form.
pub fn to_ascii(bs: &Bytestream) -> String {
    let mut text = hex::encode_upper(bs.as_bytes());
    let crc = crc32(text.as_bytes());
    text.push_str(&format!("{crc:08X}"));
    text
}

/// Decode the ASCII wire form, checking both the transport CRC and the inner CRC.
///
/// Whitespace anywhere in `text` is ignored, so wrapped or indented forms decode.
pub fn from_ascii(text: &str) -> OnscResult<Bytestream> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.len() < 8 + 2 * (1 + CRC_LEN) || !compact.is_ascii() {
        return Err(OnscError::StructuralFormat(format!(
            "ASCII bytestream too short ({} characters)",
            compact.len()
        )));
    }
    let (body, crc_text) = compact.split_at(compact.len() - 8);
    let stored = u32::from_str_radix(crc_text, 16)
        .map_err(|_| OnscError::StructuralFormat(format!("bad ASCII CRC field '{crc_text}'")))?;
    let computed = crc32(body.as_bytes());
    if stored != computed {
        return Err(OnscError::IntegrityCheck(format!(
            "ASCII transport CRC32 {stored:08X} != computed {computed:08X}"
        )));
    }
    let bytes = hex::decode(body)
        .map_err(|e| OnscError::StructuralFormat(format!("bad hex in ASCII bytestream: {e}")))?;
    Bytestream::from_bytes(bytes)
}
