use std::fmt;
use thiserror::Error;

pub type OnscResult<T> = Result<T, OnscError>;

#[derive(Debug, Error)]
pub enum OnscError {
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capacity exceeded: {0}")]
    NoMemory(String),

    #[error("malformed input: {0}")]
    StructuralFormat(String),

    #[error("CRC32 check failed: {0}")]
    IntegrityCheck(String),

    #[error("cryptographic operation failed: {0}")]
    CryptoOperation(String),

    #[error("wrong key type: {0}")]
    WrongKeyType(String),

    #[error("bad key bytestream: {0}")]
    BadKey(String),

    #[error("bad signature bytestream: {0}")]
    BadSignature(String),

    #[error("no signature block found in {0}")]
    NoSignatureFound(String),

    #[error("bad signature block: {0}")]
    BadSignatureBlock(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<OnscError>,
    },
}

/// Flat classification of an [`OnscError`], independent of which step raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    NoMemory,
    StructuralFormat,
    IntegrityCheck,
    CryptoOperation,
    WrongKeyType,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::NoMemory => "no-memory",
            ErrorKind::StructuralFormat => "structural-format",
            ErrorKind::IntegrityCheck => "integrity-check",
            ErrorKind::CryptoOperation => "crypto-operation",
            ErrorKind::WrongKeyType => "wrong-key-type",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

impl OnscError {
    /// Wrap an `io::Error` with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        OnscError::Io {
            context: context.into(),
            source,
        }
    }

    /// Annotate this error with the workflow step that raised it.
    pub fn at_step(self, step: &'static str) -> Self {
        OnscError::Step {
            step,
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OnscError::Io { .. } => ErrorKind::Io,
            OnscError::NoMemory(_) => ErrorKind::NoMemory,
            OnscError::StructuralFormat(_)
            | OnscError::BadKey(_)
            | OnscError::BadSignature(_)
            | OnscError::NoSignatureFound(_)
            | OnscError::BadSignatureBlock(_) => ErrorKind::StructuralFormat,
            OnscError::IntegrityCheck(_) => ErrorKind::IntegrityCheck,
            OnscError::CryptoOperation(_) => ErrorKind::CryptoOperation,
            OnscError::WrongKeyType(_) => ErrorKind::WrongKeyType,
            OnscError::Config(_) => ErrorKind::Config,
            OnscError::Step { source, .. } => source.kind(),
        }
    }

    /// The innermost error, with any workflow step annotations removed.
    pub fn root(&self) -> &OnscError {
        match self {
            OnscError::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Step annotation for results, in the manner of `anyhow::Context`.
pub trait StepContext<T> {
    fn at_step(self, step: &'static str) -> OnscResult<T>;
}

impl<T> StepContext<T> for OnscResult<T> {
    fn at_step(self, step: &'static str) -> OnscResult<T> {
        self.map_err(|e| e.at_step(step))
    }
}
