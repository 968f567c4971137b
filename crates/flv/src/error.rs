//! Error types.

use std::path::PathBuf;

/// Error type for FLV processing.
#[derive(Debug, thiserror::Error)]
pub enum FlvError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// AMF error while reading or writing script data.
    #[error("amf: {0}")]
    Amf(#[from] scuffle_amf::AmfError),
    /// The FLV signature (magic bytes) is invalid.
    #[error("invalid signature in header: 0x{0:x}")]
    InvalidSignature(u32),
    /// The data offset in the FLV header is invalid.
    #[error("invalid data offset: {0}")]
    InvalidDataOffset(u32),
    /// A tag body does not fit in the 24 bit size field.
    #[error("tag body too large: {0} bytes")]
    BodyTooLarge(usize),
    /// A script tag did not carry the expected name.
    #[error("unexpected script data: expected {expected}, got {got}")]
    UnexpectedScript {
        /// The expected script name.
        expected: &'static str,
        /// The script name that was found.
        got: String,
    },
    /// The reader or writer was closed.
    #[error("closed")]
    Closed,
    /// The write lock could not be acquired in time and nothing could take over.
    #[error("timed out waiting for the write lock")]
    LockTimeout,
    /// The temporary data store of a writer does not exist.
    #[error("missing data file: {0}")]
    MissingDataFile(PathBuf),
    /// The path cannot be used for this operation.
    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),
}
