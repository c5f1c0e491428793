//! Plain-text certificate codec
//!
//! A certificate is a run of `section {` ... `}` blocks. Inside a block every
//! line is `tag value`, the tag being the first whitespace-delimited token.
//! Keys sit in their block as armoured objects.

use onsc_core::{OnscError, OnscResult};
use onsc_crypto::{from_ascii, to_ascii};

use crate::armor::{get_object, put_object, ObjectKind};
use crate::model::{Certificate, Key, KeyMaterial, SignatureRecord, User};

const USER_SECTION: &str = "user";
const PUBLIC_KEY_SECTION: &str = "public_key";
const SECRET_KEY_SECTION: &str = "secret_key";
const SIGNATURE_SECTION: &str = "signature";

const USER_TAGS: [&str; 4] = ["name", "organisation", "id", "keysource"];
const SIGNER_TAGS: [&str; 5] = ["auth", "organisation", "id", "keysource", "value"];

/// Values of a section's tags, in the order asked for, plus how many matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub values: Vec<Option<String>>,
    pub matched: usize,
}

/// Collect `tags` from the first `section { ... }` block of `text`.
/// `None` when the block does not exist.
pub fn parse_section(text: &str, section: &str, tags: &[&str]) -> Option<Section> {
    let opener = format!("{section} {{");
    let mut lines = text.lines().map(str::trim);
    lines.find(|l| l.starts_with(&opener))?;

    let mut values = vec![None; tags.len()];
    let mut matched = 0;
    for line in lines.take_while(|l| *l != "}") {
        let (tag, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        if let Some(slot) = tags.iter().position(|t| *t == tag) {
            if values[slot].is_none() {
                values[slot] = Some(rest.trim().to_string());
                matched += 1;
            }
        }
    }
    Some(Section { values, matched })
}

/// `text` without its `signature { ... }` block.
pub fn strip_signature(text: &str) -> String {
    let opener = format!("{SIGNATURE_SECTION} {{");
    let mut out = String::with_capacity(text.len());
    let mut inside = false;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if inside {
            if trimmed == "}" {
                inside = false;
            }
        } else if trimmed.starts_with(&opener) {
            inside = true;
        } else {
            out.push_str(line);
        }
    }
    out
}

fn check_field(value: &str, field: &str) -> OnscResult<()> {
    if value.contains(['\n', '\r']) {
        return Err(OnscError::StructuralFormat(format!(
            "{field} cannot span lines in a text certificate"
        )));
    }
    Ok(())
}

fn write_user_lines(out: &mut String, user: &User, name_tag: &str) -> OnscResult<()> {
    check_field(&user.name, "name")?;
    check_field(&user.organization, "organization")?;
    check_field(&user.keysource, "keysource")?;
    out.push_str(&format!("\t{name_tag}\t\t{}\n", user.name));
    out.push_str(&format!("\torganisation\t{}\n", user.organization));
    out.push_str(&format!("\tid\t\t{}\n", user.id));
    out.push_str(&format!("\tkeysource\t{}\n", user.keysource));
    Ok(())
}

pub fn to_text(cert: &Certificate) -> OnscResult<String> {
    let mut out = String::new();

    out.push_str(&format!("{USER_SECTION} {{\n"));
    write_user_lines(&mut out, &cert.user, "name")?;
    out.push_str("}\n");

    if let Some(key) = &cert.key {
        let bs = match &key.material {
            KeyMaterial::Plain(bs) => bs,
            KeyMaterial::Encrypted(_) => {
                return Err(OnscError::StructuralFormat(
                    "encrypted keys cannot be written to a text certificate".into(),
                ))
            }
        };
        let (section, kind) = if key.is_public {
            (PUBLIC_KEY_SECTION, ObjectKind::PublicKey)
        } else {
            (SECRET_KEY_SECTION, ObjectKind::SecretKey)
        };
        out.push_str(&format!("{section} {{\n"));
        out.push_str(&put_object(kind, bs));
        out.push_str("}\n");
    }

    if let Some(sig) = &cert.signature {
        out.push_str(&format!("{SIGNATURE_SECTION} {{\n"));
        write_user_lines(&mut out, &sig.signer, "auth")?;
        if let Some(value) = &sig.value {
            out.push_str(&format!("\tvalue\t\t{}\n", to_ascii(value)));
        }
        out.push_str("}\n");
    }
    Ok(out)
}

fn parse_id(raw: &str, section: &str) -> OnscResult<u32> {
    raw.parse().map_err(|_| {
        OnscError::StructuralFormat(format!("{section} id '{raw}' is not a 32-bit integer"))
    })
}

fn take(values: &mut [Option<String>], slot: usize) -> String {
    values[slot].take().unwrap_or_default()
}

pub fn from_text(text: &str) -> OnscResult<Certificate> {
    let mut user = parse_section(text, USER_SECTION, &USER_TAGS)
        .ok_or_else(|| OnscError::StructuralFormat("no user section".into()))?;
    if user.matched != USER_TAGS.len() {
        return Err(OnscError::StructuralFormat(format!(
            "user section has {} of {} required fields",
            user.matched,
            USER_TAGS.len()
        )));
    }
    let id = parse_id(&take(&mut user.values, 2), USER_SECTION)?;
    let mut cert = Certificate::new(User {
        name: take(&mut user.values, 0),
        organization: take(&mut user.values, 1),
        id,
        keysource: take(&mut user.values, 3),
    });

    if parse_section(text, PUBLIC_KEY_SECTION, &[]).is_some() {
        let bs = get_object(text, ObjectKind::PublicKey)?;
        cert.key = Some(Key::new(true, KeyMaterial::Plain(bs)));
    } else if parse_section(text, SECRET_KEY_SECTION, &[]).is_some() {
        let bs = get_object(text, ObjectKind::SecretKey)?;
        cert.key = Some(Key::new(false, KeyMaterial::Plain(bs)));
    }

    if let Some(mut sig) = parse_section(text, SIGNATURE_SECTION, &SIGNER_TAGS) {
        if sig.values[0].is_none() || sig.values[3].is_none() {
            return Err(OnscError::StructuralFormat(
                "signature section needs both auth and keysource".into(),
            ));
        }
        // organisation and id may be absent
        let id = match sig.values[2].take() {
            Some(raw) => parse_id(&raw, SIGNATURE_SECTION)?,
            None => 0,
        };
        let signer = User {
            name: take(&mut sig.values, 0),
            organization: take(&mut sig.values, 1),
            id,
            keysource: take(&mut sig.values, 3),
        };
        let mut record = SignatureRecord::pending(signer);
        record.value = match sig.values[4].take() {
            Some(ascii) if !ascii.is_empty() => Some(from_ascii(&ascii)?),
            _ => None,
        };
        cert.signature = Some(record);
    }
    Ok(cert)
}
