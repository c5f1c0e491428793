pub mod config;
pub mod error;
pub mod types;

pub use config::{CertificateFormat, KeystoreKind, OnscConfig};
pub use error::{ErrorKind, OnscError, OnscResult, StepContext};
pub use types::{DigestAlgorithm, SequenceId};
