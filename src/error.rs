use thiserror::Error;

use crate::structs::EventKind;

/// Crate-wide Result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad class of an [`Error`].
///
/// The simulator aborts on every error, but tests need to tell a bug in the
/// core apart from a geometry that simply ran out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An internal invariant was broken.
    Bug,
    /// Free blocks or log blocks ran out.
    Exhausted,
    /// The configuration or an address handed in is unusable.
    Config,
    /// The storage controller refused an operation.
    Device,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("controller failed to issue {kind:?} at {address:?}")]
    IssueFailed {
        kind: EventKind,
        address: Option<u64>,
    },

    #[error("no free block left after garbage collection")]
    OutOfFreeBlocks,

    #[error("log block ceiling of {max} exceeded")]
    LogBlockCeiling { max: u64 },

    #[error("address {address} out of range (limit {limit})")]
    AddressOutOfRange { address: u64, limit: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IssueFailed { .. } => ErrorKind::Device,
            Self::OutOfFreeBlocks | Self::LogBlockCeiling { .. } => ErrorKind::Exhausted,
            Self::AddressOutOfRange { .. } | Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Invariant(_) => ErrorKind::Bug,
        }
    }

    pub fn is_bug(&self) -> bool {
        self.kind() == ErrorKind::Bug
    }
}
