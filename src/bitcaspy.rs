// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    bufpool::BufferPool,
    coding::Encode,
    config::Config,
    flock::FLock,
    key_dir::{KeyDir, Meta, HINTS_FILE},
    path::absolute_path,
    record::{now_secs, Header, Record, HEADER_SIZE},
    segment::{self, Scanner, Segment, SegmentId},
    HashMap,
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    thread::JoinHandle,
    time::{SystemTime, UNIX_EPOCH},
};

/// A persistent Bitcask-style key-value store
///
/// Cloning the handle is cheap; all clones refer to the same store.
#[derive(Clone)]
pub struct BitCaspy(Arc<BitCaspyInner>);

impl std::ops::Deref for BitCaspy {
    type Target = BitCaspyInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Mutable engine state, guarded by one readers-writer lock.
pub(crate) struct State {
    pub(crate) key_dir: KeyDir,

    /// The segment currently receiving appends
    pub(crate) active: Segment,

    /// Sealed, read-only segments awaiting compaction, by ID
    pub(crate) stale: HashMap<SegmentId, Segment>,

    /// Held while the store is writable
    pub(crate) flock: Option<FLock>,
}

/// The store behind the [`BitCaspy`] handle
#[allow(clippy::module_name_repetitions)]
pub struct BitCaspyInner {
    /// Base folder
    pub path: PathBuf,

    pub(crate) config: Config,

    /// `None` once the store has been closed
    pub(crate) state: RwLock<Option<State>>,

    pub(crate) buf_pool: BufferPool,

    workers: Mutex<Vec<JoinHandle<()>>>,
    stop_signal: Mutex<Option<crossbeam::channel::Sender<()>>>,
}

/// Serialises one record and appends it to the segment, returning the
/// key directory entry that addresses it.
pub(crate) fn append_record(
    buf_pool: &BufferPool,
    segment: &mut Segment,
    key: &[u8],
    value: &[u8],
    expiry: u32,
) -> crate::Result<Meta> {
    // The whole record (header + key + value) must be addressable as one
    // u32-sized range, not just the key and value individually
    let record_size = HEADER_SIZE
        .checked_add(key.len())
        .and_then(|n| n.checked_add(value.len()))
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(crate::Error::ValueTooLarge)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(value);

    // NOTE: Truncation is impossible, the full record fits u32
    #[allow(clippy::cast_possible_truncation)]
    let header = Header {
        crc: hasher.finalize(),
        tstamp: now_secs(),
        expiry,
        ksz: key.len() as u32,
        vsz: value.len() as u32,
    };

    let mut buf = buf_pool.get();
    header.encode_into(&mut buf)?;
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let record_pos = segment.append(&buf)?;

    buf_pool.put(buf);

    Ok(Meta {
        segment_id: segment.id(),
        record_size,
        record_pos,
        tstamp: header.tstamp,
    })
}

/// Writes a tombstone for the key and drops it from the key directory.
pub(crate) fn tombstone(
    buf_pool: &BufferPool,
    state: &mut State,
    key: &[u8],
) -> crate::Result<()> {
    append_record(buf_pool, &mut state.active, key, &[], 0)?;
    state.key_dir.remove(key);
    Ok(())
}

fn ensure_directory(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(path)
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(path)
    }
}

/// Removes scratch directories a crashed merge may have left behind.
fn remove_stale_scratch(path: &Path) -> std::io::Result<()> {
    for dirent in std::fs::read_dir(path)? {
        let dirent = dirent?;

        if !dirent.file_type()?.is_dir() {
            continue;
        }

        if dirent.file_name().to_str().is_some_and(|name| name.starts_with(".tmp")) {
            log::debug!("Removing leftover merge scratch {:?}", dirent.path());
            std::fs::remove_dir_all(dirent.path())?;
        }
    }

    Ok(())
}

/// Rebuilds the key directory by scanning all segments in ascending ID order.
///
/// An empty-value record is a tombstone and suppresses all earlier records
/// for its key.
fn scan_segments(path: &Path, ids: &[SegmentId]) -> crate::Result<KeyDir> {
    let mut key_dir = KeyDir::default();

    for &id in ids {
        log::debug!("Scanning segment {id}");

        for item in Scanner::new(&segment::segment_path(path, id), id)? {
            let record = item?;

            if record.header.vsz == 0 {
                key_dir.remove(&record.key);
            } else {
                key_dir.set(
                    record.key,
                    Meta {
                        segment_id: id,
                        record_size: record.record_size,
                        record_pos: record.record_pos,
                        tstamp: record.header.tstamp,
                    },
                );
            }
        }
    }

    Ok(key_dir)
}

/// Loads the key directory from the hint file, falling back to a full
/// segment scan when the hints are missing, corrupt, or reference segments
/// that no longer exist (e.g. after a crash mid-compaction).
fn load_key_dir(path: &Path, ids: &[SegmentId], active_id: SegmentId) -> crate::Result<KeyDir> {
    match KeyDir::decode_file(&path.join(HINTS_FILE)) {
        Ok(Some(key_dir)) => {
            let all_resolvable = key_dir.iter().all(|(_, meta)| {
                meta.segment_id == active_id || ids.binary_search(&meta.segment_id).is_ok()
            });

            if all_resolvable {
                log::debug!("Loaded {} keys from hint file", key_dir.len());
                return Ok(key_dir);
            }

            log::warn!("Hint file references missing segments, rebuilding key directory");
        }
        Ok(None) => {
            if ids.is_empty() {
                return Ok(KeyDir::default());
            }
            log::info!(
                "No hint file, rebuilding key directory from {} segments",
                ids.len(),
            );
        }
        Err(e) => {
            log::warn!("Hint file is unreadable ({e}), rebuilding key directory from segments");
        }
    }

    scan_segments(path, ids)
}

impl BitCaspy {
    /// Opens or creates a store in the configured directory.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or another process holds the
    /// directory lock and the store is writable.
    pub fn open(config: Config) -> crate::Result<Self> {
        let path = absolute_path(&config.dir);
        log::info!("Opening store at {}", path.display());

        if config.debug {
            log::debug!("Effective configuration: {config:?}");
        }

        ensure_directory(&path)?;

        let flock = if config.read_only {
            None
        } else {
            let flock = FLock::acquire(&path)?;
            // safe to clean only once we hold the lock; another process
            // could otherwise be mid-merge
            remove_stale_scratch(&path)?;
            Some(flock)
        };

        let ids = segment::list_segment_ids(&path)?;

        // NOTE: IDs fit u64 comfortably
        #[allow(clippy::cast_possible_truncation)]
        let active_id = ids.len() as SegmentId;

        let mut stale = HashMap::default();

        for &id in &ids {
            if id == active_id {
                // a sparse ID set can collide with the chosen active ID; that
                // file simply becomes the active segment again
                continue;
            }
            stale.insert(id, Segment::open(&path, id)?);
        }

        let active = Segment::open(&path, active_id)?;

        let key_dir = load_key_dir(&path, &ids, active_id)?;

        log::debug!(
            "Store has {} live keys, {} stale segments, active segment {active_id}",
            key_dir.len(),
            stale.len(),
        );

        let store = Self(Arc::new(BitCaspyInner {
            path,
            config,
            state: RwLock::new(Some(State {
                key_dir,
                active,
                stale,
                flock,
            })),
            buf_pool: BufferPool::default(),
            workers: Mutex::new(Vec::new()),
            stop_signal: Mutex::new(None),
        }));

        if !store.config.read_only {
            store.spawn_workers()?;
        }

        Ok(store)
    }

    fn spawn_workers(&self) -> crate::Result<()> {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(0);

        let mut workers = self.workers.lock().expect("lock is poisoned");

        workers.push(spawn_ticker(
            "bitcaspy-rotate",
            Arc::downgrade(&self.0),
            stop_rx.clone(),
            self.config.check_file_size_interval,
            BitCaspyInner::rotate_if_needed,
        )?);

        workers.push(spawn_ticker(
            "bitcaspy-compact",
            Arc::downgrade(&self.0),
            stop_rx.clone(),
            self.config.compact_interval,
            BitCaspyInner::compact,
        )?);

        if let Some(interval) = self.config.sync_interval {
            if !self.config.always_fsync {
                workers.push(spawn_ticker(
                    "bitcaspy-sync",
                    Arc::downgrade(&self.0),
                    stop_rx,
                    interval,
                    BitCaspyInner::sync,
                )?);
            }
        }

        *self.stop_signal.lock().expect("lock is poisoned") = Some(stop_tx);

        Ok(())
    }
}

fn spawn_ticker<F>(
    name: &str,
    store: std::sync::Weak<BitCaspyInner>,
    stop_rx: crossbeam::channel::Receiver<()>,
    interval: std::time::Duration,
    f: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: Fn(&BitCaspyInner) -> crate::Result<()> + Send + 'static,
{
    let name = name.to_owned();

    std::thread::Builder::new().name(name.clone()).spawn(move || {
        let ticker = crossbeam::channel::tick(interval);

        loop {
            crossbeam::select! {
                recv(ticker) -> _ => {
                    let Some(store) = store.upgrade() else {
                        return;
                    };

                    if let Err(e) = f(&store) {
                        log::error!("{name}: background pass failed: {e}");
                    }
                }
                recv(stop_rx) -> _ => {
                    log::trace!("{name}: shutting down");
                    return;
                }
            }
        }
    })
}

impl BitCaspyInner {
    pub(crate) fn hints_path(&self) -> PathBuf {
        self.path.join(HINTS_FILE)
    }

    /// Stores a key-value pair.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is read-only or closed, the key or
    /// value is out of bounds, or an IO error occurs.
    pub fn put(&self, key: &[u8], value: &[u8]) -> crate::Result<()> {
        self.put_at(key, value, 0)
    }

    /// Stores a key-value pair that expires at the given wall-clock time.
    ///
    /// # Errors
    ///
    /// Same as [`BitCaspyInner::put`].
    pub fn put_with_expiry(
        &self,
        key: &[u8],
        value: &[u8],
        expires_at: SystemTime,
    ) -> crate::Result<()> {
        // NOTE: Truncation is OK until 2106
        #[allow(clippy::cast_possible_truncation)]
        let expiry = expires_at
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as u32);

        self.put_at(key, value, expiry)
    }

    fn put_at(&self, key: &[u8], value: &[u8], expiry: u32) -> crate::Result<()> {
        if self.config.read_only {
            return Err(crate::Error::ReadOnly);
        }
        if key.is_empty() {
            return Err(crate::Error::EmptyKey);
        }
        if u32::try_from(key.len()).is_err() {
            return Err(crate::Error::KeyTooLarge);
        }
        if u32::try_from(value.len()).is_err() {
            return Err(crate::Error::ValueTooLarge);
        }

        let mut guard = self.state.write().expect("lock is poisoned");
        let state = guard.as_mut().ok_or(crate::Error::Closed)?;

        let meta = append_record(&self.buf_pool, &mut state.active, key, value, expiry)?;
        state.key_dir.set(key.to_vec(), meta);

        if self.config.always_fsync {
            state.active.sync()?;
        }

        Ok(())
    }

    /// Retrieves the value stored under the key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the key does not exist, has expired, fails its
    /// checksum, or an IO error occurs.
    pub fn get(&self, key: &[u8]) -> crate::Result<Vec<u8>> {
        let guard = self.state.read().expect("lock is poisoned");
        let state = guard.as_ref().ok_or(crate::Error::Closed)?;

        self.read_record(state, key).map(|record| record.value)
    }

    /// Reads and validates the record the key directory points at.
    pub(crate) fn read_record(&self, state: &State, key: &[u8]) -> crate::Result<Record> {
        let meta = state.key_dir.get(key).ok_or(crate::Error::KeyNotFound)?;

        let segment = if meta.segment_id == state.active.id() {
            &state.active
        } else {
            state
                .stale
                .get(&meta.segment_id)
                .ok_or(crate::Error::CorruptIndex(meta.segment_id))?
        };

        let bytes = segment.read_at(meta.record_pos, meta.record_size)?;
        let record = Record::from_bytes(&bytes)?;

        if record.is_expired(now_secs()) {
            return Err(crate::Error::KeyExpired);
        }

        if !record.is_valid_checksum() {
            return Err(crate::Error::ChecksumMismatch);
        }

        Ok(record)
    }

    /// Deletes a key by writing a tombstone record.
    ///
    /// Succeeds even if the key does not exist.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is read-only or closed, or an IO error
    /// occurs.
    pub fn delete(&self, key: &[u8]) -> crate::Result<()> {
        if self.config.read_only {
            return Err(crate::Error::ReadOnly);
        }

        let mut guard = self.state.write().expect("lock is poisoned");
        let state = guard.as_mut().ok_or(crate::Error::Closed)?;

        tombstone(&self.buf_pool, state, key)?;

        if self.config.always_fsync {
            state.active.sync()?;
        }

        Ok(())
    }

    /// Snapshot of all live keys.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is closed.
    pub fn keys(&self) -> crate::Result<Vec<Vec<u8>>> {
        let guard = self.state.read().expect("lock is poisoned");
        let state = guard.as_ref().ok_or(crate::Error::Closed)?;

        Ok(state.key_dir.keys())
    }

    /// Number of live keys.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is closed.
    pub fn len(&self) -> crate::Result<usize> {
        let guard = self.state.read().expect("lock is poisoned");
        let state = guard.as_ref().ok_or(crate::Error::Closed)?;

        Ok(state.key_dir.len())
    }

    /// Whether the store holds no live keys.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is closed.
    pub fn is_empty(&self) -> crate::Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Folds over all live keys.
    ///
    /// The key set is snapshotted up front; values are then read without
    /// holding the store lock, so they may reflect concurrent writes. The
    /// fold aborts with the first per-key read error.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is closed or any key fails to read.
    pub fn fold<A, F>(&self, init: A, mut f: F) -> crate::Result<A>
    where
        F: FnMut(&[u8], Vec<u8>, A) -> A,
    {
        let keys = self.keys()?;

        let mut acc = init;

        for key in keys {
            let value = self.get(&key)?;
            acc = f(&key, value, acc);
        }

        Ok(acc)
    }

    /// Flushes the active segment to stable storage.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the store is read-only or closed, or the flush
    /// fails.
    pub fn sync(&self) -> crate::Result<()> {
        if self.config.read_only {
            return Err(crate::Error::ReadOnly);
        }

        let guard = self.state.write().expect("lock is poisoned");
        let state = guard.as_ref().ok_or(crate::Error::Closed)?;

        state.active.sync()?;

        Ok(())
    }

    /// Shuts the store down: stops background workers, persists the hint
    /// file, closes all segments and releases the directory lock.
    ///
    /// Idempotent; a second call is a no-op.
    ///
    /// # Errors
    ///
    /// Shutdown continues past individual failures; the first error is
    /// returned after everything has been attempted.
    pub fn close(&self) -> crate::Result<()> {
        // Stop and join workers before taking the write lock, so a worker
        // blocked on that lock cannot deadlock the shutdown
        if let Some(stop_tx) = self.stop_signal.lock().expect("lock is poisoned").take() {
            drop(stop_tx);
        }

        let workers = std::mem::take(&mut *self.workers.lock().expect("lock is poisoned"));
        for worker in workers {
            if worker.join().is_err() {
                log::warn!("A background worker panicked during shutdown");
            }
        }

        let mut guard = self.state.write().expect("lock is poisoned");
        let Some(mut state) = guard.take() else {
            return Ok(());
        };

        log::info!("Closing store at {}", self.path.display());

        let mut first_error: Option<crate::Error> = None;

        if !self.config.read_only {
            if let Err(e) = state.key_dir.encode_file(&self.hints_path()) {
                log::error!("Could not write hint file: {e}");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = state.active.close() {
            log::error!("Could not close active segment: {e}");
            first_error.get_or_insert(e.into());
        }

        for (id, segment) in state.stale.drain() {
            log::trace!("Closing stale segment {id}");
            drop(segment);
        }

        if let Some(flock) = state.flock.take() {
            if let Err(e) = flock.release() {
                log::error!("Could not release directory lock: {e}");
                first_error.get_or_insert(e.into());
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for BitCaspyInner {
    fn drop(&mut self) {
        // Flush if the store is dropped without close
        if let Ok(mut guard) = self.state.write() {
            if let Some(state) = guard.take() {
                log::trace!("Store dropped without close, flushing active segment");
                if let Err(e) = state.active.sync() {
                    log::error!("Could not flush active segment: {e}");
                }
            }
        }
    }
}
