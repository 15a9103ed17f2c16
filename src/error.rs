// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    segment::SegmentId,
};

/// Represents errors that can occur in the key-value store
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// A positional read yielded fewer bytes than requested
    ShortRead,

    /// Key does not exist
    KeyNotFound,

    /// Key exists, but its record's expiry has passed
    KeyExpired,

    /// The stored CRC does not match the value read from disk
    ChecksumMismatch,

    /// Key length is zero
    EmptyKey,

    /// Key length exceeds `u32::MAX`
    KeyTooLarge,

    /// Value length, or the total record length, exceeds `u32::MAX`
    ValueTooLarge,

    /// Mutation attempted on a read-only store
    ReadOnly,

    /// Operation attempted on a closed store
    Closed,

    /// Another process holds the directory lock
    AlreadyLocked,

    /// The key directory points at a segment that does not exist
    CorruptIndex(SegmentId),

    /// The hint file could not be decoded
    CorruptHint(DecodeError),

    /// A record could not be decoded
    Decode(DecodeError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitCaspyError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::CorruptHint(e) | Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::Io(e) => Self::Io(e),
        }
    }
}

/// Store result
pub type Result<T> = std::result::Result<T, Error>;
