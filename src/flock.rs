// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use fs4::fs_std::FileExt;
use std::{
    fs::File,
    path::{Path, PathBuf},
};

/// File name of the lock file inside the data directory
pub(crate) const LOCK_FILE: &str = "bitcaspy.lock";

/// Exclusive advisory lock over a data directory.
///
/// Held for the lifetime of a writable store. The lock file itself carries no
/// data; a leftover file from a crashed process does not block a fresh
/// acquire because the advisory lock died with that process.
pub(crate) struct FLock {
    file: File,
    path: PathBuf,
}

impl FLock {
    /// Creates the lock file if needed and takes a non-blocking exclusive lock.
    pub fn acquire(dir: &Path) -> crate::Result<Self> {
        let path = dir.join(LOCK_FILE);

        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| crate::Error::AlreadyLocked)?;

        Ok(Self { file, path })
    }

    /// Unlocks, closes and removes the lock file.
    pub fn release(self) -> std::io::Result<()> {
        self.file.unlock()?;
        drop(self.file);
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
