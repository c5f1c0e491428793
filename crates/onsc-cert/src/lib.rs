//! onsc-cert: certificates and the chain of trust
//!
//! A certificate binds a user identity to a DSA public key and, once an
//! authority has vouched for it, carries the authority's identity and
//! signature. Certificates are written either as XML or as plain text; both
//! forms are signed over their own serialization with the signature payload
//! cut out.
//!
//! ```text
//! build_certificate → issue_keys → sign_certificate (authority) → verify_certificate
//!                                         ↑
//!                      SecretKeySource: XML key file | key token
//! ```

pub mod armor;
pub mod keystore;
pub mod model;
pub mod text;
pub mod workflow;
pub mod xml;

pub use armor::{get_object, put_object, ObjectKind};
pub use keystore::{
    FileKeySource, FileToken, KeyToken, MemoryToken, SecretKeySource, TokenKeySource,
    TOKEN_CAPACITY,
};
pub use model::{Certificate, Key, KeyMaterial, SignatureRecord, Stage, User};
pub use workflow::{
    build_certificate, parse, read_certificate, serialize, signing_digest, write_certificate,
    TrustContext,
};
