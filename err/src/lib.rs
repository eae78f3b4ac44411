#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] IoError),
    #[error("Format: {0}")]
    Format(#[from] FormatError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("{0}")]
    Underlying(#[from] std::io::Error),
    #[error("End of media at offset 0x{offset:08x}")]
    EndOfMedia { offset: u64 },
    #[error("Aborted")]
    Aborted,
}

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("Invalid signature at offset 0x{offset:08x}")]
    InvalidSignature { offset: u64 },
    #[error("Unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("{field} value {value} exceeds limit {limit}")]
    OutOfBounds {
        field: &'static str,
        value: u64,
        limit: u64,
    },
    #[error("Invalid format: {context}")]
    InvalidFormat { context: &'static str },
    #[error("Object 0x{identifier:04x} not found")]
    ObjectNotFound { identifier: u64 },
    #[error("Key not found")]
    KeyNotFound,
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(IoError::Underlying(error))
    }
}

pub type Result<T> = core::result::Result<T, Error>;
