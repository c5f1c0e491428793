//! XML certificate codec
//!
//! ```text
//! <entity>
//!     <user> name organization idnum keysource </user>
//!     <key type=".." algorithm="openns" version="1.0" encoding="hex|crypthex"> HEX </key>
//!     <signature>
//!         <user> ... </user>
//!         <sigstream algorithm="openns" version="1.0" encoding="hex"> HEX </sigstream>
//!     </signature>
//! </entity>
//! ```
//!
//! The writer layout is fixed (tab indents, hex wrapped at `60 - 4 * depth`
//! columns) since the signing digest is taken over the serialized text.

use roxmltree::{Document, Node};

use onsc_core::{OnscError, OnscResult};
use onsc_crypto::{from_ascii, to_ascii};

use crate::model::{Certificate, Key, KeyMaterial, SignatureRecord, User, ALGORITHM, VERSION};

const XML_DECL: &str = "<?xml version=\"1.0\"?>\n";
const HEX_LINE_WIDTH: usize = 60;

const ENCODING_HEX: &str = "hex";
const ENCODING_CRYPTHEX: &str = "crypthex";

fn xml_err(msg: impl Into<String>) -> OnscError {
    OnscError::StructuralFormat(msg.into())
}

// ── Writer ────────────────────────────────────────────────────────────────

fn tabs(out: &mut String, n: usize) {
    out.extend(std::iter::repeat('\t').take(n));
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Hex payload inside an element at depth `base_tab`.
fn write_hex(out: &mut String, data: &str, base_tab: usize) {
    let width = HEX_LINE_WIDTH.saturating_sub(4 * base_tab);
    let last = data.len().saturating_sub(1);
    tabs(out, base_tab + 1);
    let mut line_out = 0;
    for (i, c) in data.chars().enumerate() {
        out.push(c);
        line_out += 1;
        if line_out >= width && i != last {
            out.push('\n');
            tabs(out, base_tab + 1);
            line_out = 0;
        }
    }
    out.push('\n');
}

fn write_field(out: &mut String, tag: &str, value: &str, base_tab: usize) {
    tabs(out, base_tab + 1);
    out.push_str(&format!("<{tag}>\n"));
    tabs(out, base_tab + 2);
    out.push_str(value);
    out.push('\n');
    tabs(out, base_tab + 1);
    out.push_str(&format!("</{tag}>\n"));
}

fn write_user(out: &mut String, user: &User, base_tab: usize) {
    tabs(out, base_tab + 1);
    out.push_str("<user>\n");
    if !user.name.is_empty() {
        write_field(out, "name", &escape(&user.name), base_tab + 1);
    }
    if !user.organization.is_empty() {
        write_field(out, "organization", &escape(&user.organization), base_tab + 1);
    }
    if user.id != 0 {
        write_field(out, "idnum", &user.id.to_string(), base_tab + 1);
    }
    if !user.keysource.is_empty() {
        write_field(out, "keysource", &escape(&user.keysource), base_tab + 1);
    }
    tabs(out, base_tab + 1);
    out.push_str("</user>\n");
}

fn key_payload(key: &Key) -> (&'static str, String) {
    match &key.material {
        KeyMaterial::Plain(bs) => (ENCODING_HEX, to_ascii(bs)),
        KeyMaterial::Encrypted(ct) => (ENCODING_CRYPTHEX, hex::encode_upper(ct)),
    }
}

fn write_key(out: &mut String, key: &Key, base_tab: usize, payload_tab: usize) {
    let (encoding, payload) = key_payload(key);
    tabs(out, base_tab + 1);
    out.push_str(&format!(
        "<key type=\"{}\" algorithm=\"{}\" version=\"{}\" encoding=\"{encoding}\">\n",
        if key.is_public { "public" } else { "private" },
        escape(&key.algorithm),
        escape(&key.version),
    ));
    write_hex(out, &payload, payload_tab);
    tabs(out, base_tab + 1);
    out.push_str("</key>\n");
}

pub fn to_xml(cert: &Certificate) -> String {
    let mut out = String::from(XML_DECL);
    out.push_str("<entity>\n");
    write_user(&mut out, &cert.user, 0);

    if let Some(key) = &cert.key {
        write_key(&mut out, key, 0, 1);
    }

    out.push_str("\t<signature>\n");
    let empty = User::default();
    let signer = cert.signature.as_ref().map_or(&empty, |s| &s.signer);
    write_user(&mut out, signer, 1);
    if let Some(sig) = &cert.signature {
        out.push_str(&format!(
            "\t\t<sigstream algorithm=\"{}\" version=\"{}\" encoding=\"{ENCODING_HEX}\">\n",
            escape(&sig.algorithm),
            escape(&sig.version),
        ));
        if let Some(value) = &sig.value {
            write_hex(&mut out, &to_ascii(value), 2);
        }
        out.push_str("\t\t</sigstream>\n");
    }
    out.push_str("\t</signature>\n");
    out.push_str("</entity>\n");
    out
}

/// `text` with the lines strictly between `<sigstream` and `</sigstream>` removed.
pub fn strip_sigstream(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut inside = false;
    for line in text.split_inclusive('\n') {
        if inside && line.contains("</sigstream>") {
            inside = false;
        }
        if !inside {
            out.push_str(line);
        }
        if line.contains("<sigstream") && !line.contains("</sigstream>") {
            inside = true;
        }
    }
    out
}

/// Secret-key file body holding an AES-wrapped key.
pub fn secret_key_to_xml(ciphertext: &[u8]) -> String {
    let mut out = String::from(XML_DECL);
    out.push_str("<entity>\n");
    write_key(&mut out, &Key::encrypted_secret(ciphertext.to_vec()), 0, 2);
    out.push_str("</entity>\n");
    out
}

// ── Parser ────────────────────────────────────────────────────────────────

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn content(node: Node<'_, '_>) -> String {
    node.text().unwrap_or_default().trim().to_string()
}

fn parse_document(text: &str) -> OnscResult<Document<'_>> {
    let doc = Document::parse(text).map_err(|e| xml_err(format!("malformed xml: {e}")))?;
    if !doc.root_element().has_tag_name("entity") {
        return Err(xml_err(format!(
            "root element is <{}>, expected <entity>",
            doc.root_element().tag_name().name()
        )));
    }
    Ok(doc)
}

fn parse_user(node: Node<'_, '_>) -> OnscResult<User> {
    let field = |tag: &str| {
        child(node, tag)
            .map(content)
            .ok_or_else(|| xml_err(format!("<user> has no <{tag}>")))
    };
    let raw_id = field("idnum")?;
    let id = raw_id
        .parse()
        .map_err(|_| xml_err(format!("idnum '{raw_id}' is not a 32-bit integer")))?;
    Ok(User {
        name: field("name")?,
        organization: field("organization")?,
        id,
        keysource: field("keysource")?,
    })
}

fn require_attr<'a>(node: Node<'a, '_>, name: &str) -> OnscResult<&'a str> {
    node.attribute(name).ok_or_else(|| {
        xml_err(format!(
            "<{}> has no {name} attribute",
            node.tag_name().name()
        ))
    })
}

fn require_openns(node: Node<'_, '_>) -> OnscResult<()> {
    let algorithm = require_attr(node, "algorithm")?;
    let version = require_attr(node, "version")?;
    if algorithm != ALGORITHM || version != VERSION {
        return Err(xml_err(format!(
            "unsupported algorithm {algorithm} version {version}"
        )));
    }
    Ok(())
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

pub(crate) fn parse_key(node: Node<'_, '_>) -> OnscResult<Key> {
    let is_public = match require_attr(node, "type")? {
        "public" => true,
        "private" => false,
        other => return Err(xml_err(format!("unknown key type '{other}'"))),
    };
    require_openns(node)?;
    let payload = strip_whitespace(node.text().unwrap_or_default());
    let material = match require_attr(node, "encoding")? {
        ENCODING_HEX => KeyMaterial::Plain(from_ascii(&payload)?),
        ENCODING_CRYPTHEX => KeyMaterial::Encrypted(
            hex::decode(&payload).map_err(|e| xml_err(format!("bad crypthex key: {e}")))?,
        ),
        other => return Err(xml_err(format!("unknown key encoding '{other}'"))),
    };
    Ok(Key::new(is_public, material))
}

fn parse_signature(node: Node<'_, '_>) -> OnscResult<Option<SignatureRecord>> {
    let Some(stream) = child(node, "sigstream") else {
        return Ok(None);
    };
    require_openns(stream)?;
    let encoding = require_attr(stream, "encoding")?;
    if encoding != ENCODING_HEX {
        return Err(xml_err(format!("unknown sigstream encoding '{encoding}'")));
    }
    let signer = child(node, "user")
        .ok_or_else(|| xml_err("<signature> has a sigstream but no signer <user>"))?;
    let mut record = SignatureRecord::pending(parse_user(signer)?);
    let payload = strip_whitespace(stream.text().unwrap_or_default());
    if !payload.is_empty() {
        record.value = Some(from_ascii(&payload)?);
    }
    Ok(Some(record))
}

pub fn from_xml(text: &str) -> OnscResult<Certificate> {
    let doc = parse_document(text)?;
    let root = doc.root_element();

    let user = child(root, "user").ok_or_else(|| xml_err("<entity> has no <user>"))?;
    let mut cert = Certificate::new(parse_user(user)?);
    cert.key = child(root, "key").map(parse_key).transpose()?;
    cert.signature = match child(root, "signature") {
        Some(node) => parse_signature(node)?,
        None => None,
    };
    Ok(cert)
}

/// The AES-wrapped key held by a secret-key file.
pub fn secret_key_from_xml(text: &str) -> OnscResult<Vec<u8>> {
    let doc = parse_document(text)?;
    let node = child(doc.root_element(), "key")
        .ok_or_else(|| xml_err("secret key file has no <key>"))?;
    match parse_key(node)? {
        Key {
            is_public: false,
            material: KeyMaterial::Encrypted(ct),
            ..
        } => Ok(ct),
        _ => Err(OnscError::WrongKeyType(
            "secret key file must hold a private crypthex key".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onsc_crypto::{BigUint, Bytestream};
    use proptest::prelude::*;

    fn stream(fill: u8, n: usize) -> Bytestream {
        let nums: Vec<BigUint> = (0..n)
            .map(|i| BigUint::from_bytes_be(&vec![fill; 20 + i]))
            .collect();
        let refs: Vec<&BigUint> = nums.iter().collect();
        Bytestream::pack(&refs).unwrap()
    }

    fn signed_cert() -> Certificate {
        let mut cert = Certificate::new(User::new(
            "A. Hydrographer",
            "NOAA & Partners",
            42,
            "file:///keys/a.xml",
        ));
        cert.key = Some(Key::new(true, KeyMaterial::Plain(stream(0xA5, 4))));
        let mut sig = SignatureRecord::pending(User::new("CSA", "UNH", 1, "token:0"));
        sig.value = Some(stream(0x5A, 2));
        cert.signature = Some(sig);
        cert
    }

    #[test]
    fn layout() {
        let xml = to_xml(&signed_cert());
        let lines: Vec<&str> = xml.lines().collect();
        assert_eq!(lines[0], "<?xml version=\"1.0\"?>");
        assert_eq!(lines[1], "<entity>");
        assert_eq!(lines[2], "\t<user>");
        assert_eq!(lines[3], "\t\t<name>");
        assert_eq!(lines[4], "\t\t\tA. Hydrographer");
        assert_eq!(lines[7], "\t\t\tNOAA &amp; Partners");
        assert!(xml.contains(
            "\t<key type=\"public\" algorithm=\"openns\" version=\"1.0\" encoding=\"hex\">\n\t\t"
        ));
        assert!(xml.contains("\t<signature>\n\t\t<user>\n\t\t\t<name>\n\t\t\t\tCSA\n"));
        assert!(xml.contains(
            "\t\t<sigstream algorithm=\"openns\" version=\"1.0\" encoding=\"hex\">\n\t\t\t"
        ));
        assert!(xml.ends_with("\t</signature>\n</entity>\n"));
    }

    #[test]
    fn hex_wraps_by_depth() {
        let mut out = String::new();
        let data = "A".repeat(130);
        write_hex(&mut out, &data, 1);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("\t\t{}", "A".repeat(56)));
        assert_eq!(lines[2], format!("\t\t{}", "A".repeat(18)));

        let mut exact = String::new();
        write_hex(&mut exact, &"B".repeat(52), 2);
        assert_eq!(exact, format!("\t\t\t{}\n", "B".repeat(52)));
    }

    #[test]
    fn roundtrip() {
        let cert = signed_cert();
        assert_eq!(from_xml(&to_xml(&cert)).unwrap(), cert);
    }

    #[test]
    fn roundtrip_pending_and_unsigned() {
        let mut cert = signed_cert();
        if let Some(sig) = cert.signature.as_mut() {
            sig.value = None;
        }
        assert_eq!(from_xml(&to_xml(&cert)).unwrap(), cert);

        cert.signature = None;
        assert_eq!(from_xml(&to_xml(&cert)).unwrap(), cert);
    }

    #[test]
    fn roundtrip_encrypted_key() {
        let mut cert = signed_cert();
        cert.key = Some(Key::encrypted_secret((0..=255u8).collect()));
        assert_eq!(from_xml(&to_xml(&cert)).unwrap(), cert);
    }

    #[test]
    fn strip_matches_pending_form() {
        let signed = to_xml(&signed_cert());
        let mut pending = signed_cert();
        if let Some(sig) = pending.signature.as_mut() {
            sig.value = None;
        }
        assert_eq!(strip_sigstream(&signed), to_xml(&pending));
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let xml = to_xml(&signed_cert()).replace(
            "version=\"1.0\" encoding=\"hex\">",
            "version=\"2.0\" encoding=\"hex\">",
        );
        assert!(matches!(from_xml(&xml), Err(OnscError::StructuralFormat(_))));
    }

    #[test]
    fn rejects_wrong_root() {
        assert!(from_xml("<?xml version=\"1.0\"?>\n<cert/>\n").is_err());
        assert!(from_xml("<entity><user>").is_err());
    }

    #[test]
    fn rejects_missing_user_field() {
        let mut cert = signed_cert();
        cert.user.keysource.clear();
        assert!(matches!(
            from_xml(&to_xml(&cert)),
            Err(OnscError::StructuralFormat(_))
        ));
    }

    #[test]
    fn secret_key_file_roundtrip() {
        let ct: Vec<u8> = (0..80u8).collect();
        let xml = secret_key_to_xml(&ct);
        assert!(xml.contains(
            "\t<key type=\"private\" algorithm=\"openns\" version=\"1.0\" encoding=\"crypthex\">\n\t\t\t"
        ));
        assert_eq!(secret_key_from_xml(&xml).unwrap(), ct);
    }

    #[test]
    fn public_key_is_not_a_secret_key_file() {
        let mut cert = Certificate::new(User::new("x", "y", 1, "z"));
        cert.key = Some(Key::new(true, KeyMaterial::Plain(stream(1, 4))));
        assert!(matches!(
            secret_key_from_xml(&to_xml(&cert)),
            Err(OnscError::WrongKeyType(_))
        ));
    }

    proptest! {
        #[test]
        fn identity_survives_escaping(
            name in "[A-Za-z0-9&<>\"']([A-Za-z0-9&<>\"' .,/:-]{0,30}[A-Za-z0-9&<>])?",
            org in "[A-Za-z&<>]{1,20}",
            id in 1u32..,
        ) {
            let cert = Certificate::new(User::new(name, org, id, "file:///k.xml"));
            prop_assert_eq!(from_xml(&to_xml(&cert)).unwrap(), cert);
        }
    }
}
