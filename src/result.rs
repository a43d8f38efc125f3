//! Error types and the related `Result<T>`

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

use crate::io::AccessFlags;

pub type MdmpResult<T> = Result<T, MdmpError>;

#[derive(Debug, Error)]
pub enum MdmpError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// Fewer bytes came back than a fixed-size structure needs.
    #[error("Unable to read {context}: expected {expected} bytes, got {found}")]
    ReadFailed {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// A seek resolved to a position before the start of the data.
    #[error("Unable to seek: {0}")]
    SeekFailed(String),

    /// The file doesn't start with `MDMP`.
    #[error("Invalid signature {0:02x?}, expected \"MDMP\"")]
    SignatureMismatch([u8; 4]),

    /// An index past the end of the stream collection
    #[error("Index {index} out of bounds for {count} streams")]
    OutOfBounds { index: usize, count: usize },

    /// Only read access is supported.
    #[error("Unsupported access flags {0:?}")]
    UnsupportedAccess(AccessFlags),

    /// The handle was opened without read access.
    #[error("Handle has no read access")]
    NoReadAccess,

    #[error("Already open")]
    AlreadyOpen,

    #[error("Not open")]
    NotOpen,

    /// Something that may only be set once was set twice.
    #[error("Value already set: {0}")]
    ValueAlreadySet(&'static str),

    /// Something required wasn't set.
    #[error("Missing value: {0}")]
    MissingValue(&'static str),

    /// The header declares zero streams.
    #[error("Invalid minidump: no streams in directory")]
    EmptyDirectory,

    /// The header declares more streams than we're willing to allocate for.
    #[error("Invalid minidump: {0} streams exceeds the maximum directory size")]
    DirectoryTooLarge(u32),

    /// A stream's data range runs past the end of the underlying resource.
    #[error(
        "Stream data range {offset:#x}+{size:#x} exceeds resource size {resource_size:#x}"
    )]
    RangeOutOfBounds {
        offset: u64,
        size: u64,
        resource_size: u64,
    },

    /// [`AbortHandle::signal()`] was called while opening.
    ///
    /// [`AbortHandle::signal()`]: ../read/struct.AbortHandle.html#method.signal
    #[error("Abort requested")]
    AbortRequested,

    /// A mutex guarding shared I/O was poisoned by a panicking thread.
    #[error("A lock around shared I/O was poisoned")]
    LockPoisoned,

    /// Couldn't allocate a buffer for the streams directory.
    #[error("Allocation failed")]
    Allocation(#[from] TryReserveError),

    /// A cast from a 64-bit int to a usize failed,
    /// probably on a 32-bit system.
    #[error("Minidump too large for address space")]
    InsufficientAddressSpace,
}

/// The broad category of an [`MdmpError`]
///
/// [`MdmpError`]: enum.MdmpError.html
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorDomain {
    /// Bad indices, flags, or declared counts
    Arguments,
    /// Malformed input data
    Input,
    /// Failures from the underlying resource
    Io,
    /// Handle state (already open, not open, missing access) and bounds problems
    Runtime,
    /// Allocation failures
    Memory,
}

impl MdmpError {
    pub fn domain(&self) -> ErrorDomain {
        match self {
            MdmpError::OutOfBounds { .. }
            | MdmpError::UnsupportedAccess(_)
            | MdmpError::EmptyDirectory => ErrorDomain::Arguments,
            MdmpError::SignatureMismatch(_) => ErrorDomain::Input,
            MdmpError::Io(_)
            | MdmpError::ReadFailed { .. }
            | MdmpError::SeekFailed(_) => ErrorDomain::Io,
            MdmpError::AlreadyOpen
            | MdmpError::NotOpen
            | MdmpError::NoReadAccess
            | MdmpError::ValueAlreadySet(_)
            | MdmpError::MissingValue(_)
            | MdmpError::DirectoryTooLarge(_)
            | MdmpError::RangeOutOfBounds { .. }
            | MdmpError::AbortRequested
            | MdmpError::LockPoisoned
            | MdmpError::InsufficientAddressSpace => ErrorDomain::Runtime,
            MdmpError::Allocation(_) => ErrorDomain::Memory,
        }
    }
}

impl From<MdmpError> for io::Error {
    fn from(e: MdmpError) -> Self {
        match e {
            MdmpError::Io(inner) => inner,
            MdmpError::ReadFailed { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            MdmpError::SeekFailed(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
