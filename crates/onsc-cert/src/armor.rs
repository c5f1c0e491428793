//! Armoured objects for plain-text certificates
//!
//! ```text
//! ------ OpenNavigationSurface Public Key ------
//! LLLL<ASCII wire form, first line 56 chars, then 60 per line>
//! ...=
//! ```
//! `LLLL` is the wire-form length in four uppercase hex digits.

use onsc_core::{OnscError, OnscResult};
use onsc_crypto::{from_ascii, to_ascii, Bytestream};

const LINE_WIDTH: usize = 60;
const LENGTH_DIGITS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    PublicKey,
    SecretKey,
    Signature,
}

impl ObjectKind {
    pub fn banner(self) -> &'static str {
        match self {
            ObjectKind::PublicKey => "------ OpenNavigationSurface Public Key ------",
            ObjectKind::SecretKey => "------ OpenNavigationSurface Secret Key ------",
            ObjectKind::Signature => "------ OpenNavigationSurface Signature ------",
        }
    }
}

/// Armour `obj` as `kind`. The result ends with a newline.
pub fn put_object(kind: ObjectKind, obj: &Bytestream) -> String {
    let ascii = to_ascii(obj);
    let mut out = String::with_capacity(ascii.len() + ascii.len() / LINE_WIDTH + 64);
    out.push_str(kind.banner());
    out.push('\n');
    out.push_str(&format!("{:04X}", ascii.len()));

    let mut line_len = LENGTH_DIGITS;
    for c in ascii.chars() {
        out.push(c);
        line_len += 1;
        if line_len >= LINE_WIDTH {
            out.push('\n');
            line_len = 0;
        }
    }
    out.push_str("=\n");
    out
}

/// Find the first object of `kind` in `text` and decode it.
pub fn get_object(text: &str, kind: ObjectKind) -> OnscResult<Bytestream> {
    let mut lines = text.lines().map(str::trim);
    if !lines.any(|l| l == kind.banner()) {
        return Err(OnscError::StructuralFormat(format!(
            "no '{}' object found",
            kind.banner()
        )));
    }

    let first = lines
        .next()
        .ok_or_else(|| OnscError::StructuralFormat("armoured object is empty".into()))?;
    let declared = first
        .get(..LENGTH_DIGITS)
        .and_then(|digits| usize::from_str_radix(digits, 16).ok())
        .ok_or_else(|| OnscError::StructuralFormat(format!("bad armour length in '{first}'")))?;

    let mut body = String::with_capacity(declared);
    let mut line = &first[LENGTH_DIGITS..];
    loop {
        if let Some(last) = line.strip_suffix('=') {
            body.push_str(last);
            break;
        }
        body.push_str(line);
        line = lines.next().ok_or_else(|| {
            OnscError::StructuralFormat("armoured object has no '=' terminator".into())
        })?;
    }

    if body.len() != declared {
        return Err(OnscError::StructuralFormat(format!(
            "armoured object is {} characters, header says {declared}",
            body.len()
        )));
    }
    from_ascii(&body)
}
