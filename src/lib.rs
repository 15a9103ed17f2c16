// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Embeddable, persistent key-value store built on the Bitcask model.
//!
//! All data lives in append-only segment files; a fully in-memory key
//! directory maps every live key to the exact byte range of its most recent
//! record. Point reads are a single positional read, writes are a single
//! append to the active segment, and a background compactor reclaims space
//! by merging segments and dropping expired or superseded records.
//!
//! Properties that follow from the design:
//! - write amplification of 1 on the hot path (one append per put)
//! - O(1) point reads through the key directory
//! - the entire key set must fit in memory, values do not
//! - startup is fast because the key directory is snapshotted to a hint
//!   file; if the hint file is lost, the directory is rebuilt by scanning
//!   the segments
//!
//! Deletes write a tombstone record (an empty value), so space is only
//! reclaimed once compaction merges the segments. A single exclusive
//! directory lock keeps a second writable process out; read-only instances
//! skip the lock.
//!
//! # Example usage
//!
//! ```
//! use bitcaspy::{BitCaspy, Config};
//!
//! # fn main() -> bitcaspy::Result<()> {
//! # let folder = tempfile::tempdir()?;
//! # let path = folder.path();
//! // Open or recover a store
//! let store = BitCaspy::open(Config::new(path))?;
//!
//! store.put(b"hello", b"world")?;
//! assert_eq!(b"world".to_vec(), store.get(b"hello")?);
//!
//! store.delete(b"hello")?;
//! assert!(matches!(store.get(b"hello"), Err(bitcaspy::Error::KeyNotFound)));
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![warn(clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]

mod bitcaspy;
mod bufpool;
mod coding;
mod compact;
mod config;
mod error;
mod flock;
mod key_dir;
mod path;
mod record;
mod segment;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    bitcaspy::{BitCaspy, BitCaspyInner},
    config::Config,
    error::{Error, Result},
    key_dir::Meta,
    segment::SegmentId,
};

#[doc(hidden)]
pub use coding::{DecodeError, EncodeError};
