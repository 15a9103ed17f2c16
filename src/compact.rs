// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    bitcaspy::{append_record, tombstone, BitCaspyInner, State},
    key_dir::Meta,
    segment::{self, Segment, SegmentId},
};

impl BitCaspyInner {
    /// Seals the active segment and starts a fresh one with the next ID once
    /// the rotation threshold is reached.
    ///
    /// Rotation never moves records; it only changes where future writes
    /// land.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is read-only or closed, or an IO error
    /// occurs.
    #[doc(hidden)]
    pub fn rotate_if_needed(&self) -> crate::Result<()> {
        if self.config.read_only {
            return Err(crate::Error::ReadOnly);
        }

        let mut guard = self.state.write().expect("lock is poisoned");
        let state = guard.as_mut().ok_or(crate::Error::Closed)?;

        if state.active.size() < self.config.max_active_file_size {
            return Ok(());
        }

        let old_id = state.active.id();
        let new_id = old_id + 1;

        let new_active = Segment::open(&self.path, new_id)?;
        let old_active = std::mem::replace(&mut state.active, new_active);
        state.stale.insert(old_id, old_active);

        log::info!(
            "Rotated active segment {old_id} -> {new_id} after {} bytes",
            state.stale.get(&old_id).map_or(0, Segment::size),
        );

        Ok(())
    }

    /// Runs one compaction pass: drops expired keys, merges stale segments,
    /// rewrites the hint file.
    ///
    /// The whole pass holds the write lock, so concurrent callers observe
    /// either the pre- or post-compaction state.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is read-only or closed, or an IO error
    /// occurs.
    #[doc(hidden)]
    pub fn compact(&self) -> crate::Result<()> {
        if self.config.read_only {
            return Err(crate::Error::ReadOnly);
        }

        let mut guard = self.state.write().expect("lock is poisoned");
        let state = guard.as_mut().ok_or(crate::Error::Closed)?;

        self.delete_expired(state)?;
        self.merge(state)?;

        state.key_dir.encode_file(&self.hints_path())?;

        Ok(())
    }

    /// Tombstone-deletes every key whose record has expired.
    fn delete_expired(&self, state: &mut State) -> crate::Result<()> {
        for key in state.key_dir.keys() {
            match self.read_record(state, &key) {
                Ok(_) => {}
                Err(crate::Error::KeyExpired) => {
                    log::debug!("Dropping expired key");
                    tombstone(&self.buf_pool, state, &key)?;
                }
                Err(e) => {
                    log::warn!("Skipping unreadable key during expiry sweep: {e}");
                }
            }
        }

        Ok(())
    }

    /// Merges all stale segments (and the live records of the active one)
    /// into a single fresh segment with ID 0.
    ///
    /// The merged file is written into a scratch directory, fsynced and
    /// renamed into place *before* any old segment file is deleted, and the
    /// key directory is only re-pointed after the rename. A crash mid-merge
    /// therefore either leaves the old state fully intact or leaves
    /// superseded segment files that a later merge collects.
    fn merge(&self, state: &mut State) -> crate::Result<()> {
        if state.stale.len() < 2 {
            return Ok(());
        }

        log::info!("Merging {} stale segments", state.stale.len());

        // Scratch lives inside the data directory so the final rename stays
        // on one filesystem
        let scratch_dir = tempfile::tempdir_in(&self.path)?;
        let mut scratch = Segment::open(scratch_dir.path(), 0)?;

        let mut staged: Vec<(Vec<u8>, Meta)> = Vec::with_capacity(state.key_dir.len());
        let mut dropped: Vec<Vec<u8>> = vec![];

        for key in state.key_dir.keys() {
            let record = match self.read_record(state, &key) {
                Ok(record) => record,
                Err(crate::Error::KeyExpired | crate::Error::ChecksumMismatch) => {
                    // can never be read again, do not carry it over
                    dropped.push(key);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let meta = append_record(
                &self.buf_pool,
                &mut scratch,
                &record.key,
                &record.value,
                record.header.expiry,
            )?;

            staged.push((record.key, meta));
        }

        scratch.sync()?;

        let scratch_path = scratch.path().to_path_buf();
        scratch.close()?;

        let old_ids: Vec<SegmentId> = state
            .stale
            .keys()
            .copied()
            .chain(std::iter::once(state.active.id()))
            .collect();

        let merged_path = segment::segment_path(&self.path, 0);
        std::fs::rename(&scratch_path, &merged_path)?;

        #[cfg(not(target_os = "windows"))]
        {
            // fsync folder on Unix so the rename is durable
            let folder = std::fs::File::open(&self.path)?;
            folder.sync_all()?;
        }

        // The merged file is in place; re-point the key directory and adopt
        // it as the active segment
        for (key, meta) in staged {
            state.key_dir.set(key, meta);
        }
        for key in dropped {
            state.key_dir.remove(&key);
        }

        let new_active = Segment::open(&self.path, 0)?;
        let old_active = std::mem::replace(&mut state.active, new_active);
        drop(old_active);
        state.stale.clear();

        for id in old_ids {
            if id == 0 {
                // that path now holds the merged file
                continue;
            }

            let path = segment::segment_path(&self.path, id);
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Could not remove merged segment {}: {e}", path.display());
            }
        }

        state.active.sync()?;

        log::info!(
            "Merged into {} ({} live keys)",
            merged_path.display(),
            state.key_dir.len(),
        );

        Ok(())
    }
}
