// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{path::PathBuf, time::Duration};

const DEFAULT_COMPACT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_FILE_SIZE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ACTIVE_FILE_SIZE: u64 = 4 * 1_024 * 1_024 * 1_024;

/// Store configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Data directory path
    pub(crate) dir: PathBuf,

    /// Verbose logging in the demo wrapper
    pub(crate) debug: bool,

    /// Forbid all mutating operations
    pub(crate) read_only: bool,

    /// Sync the active segment after every successful put
    pub(crate) always_fsync: bool,

    /// Cadence of the periodic sync worker
    pub(crate) sync_interval: Option<Duration>,

    /// Cadence of the compaction worker
    pub(crate) compact_interval: Duration,

    /// Cadence of the rotation size check
    pub(crate) check_file_size_interval: Duration,

    /// Rotation threshold of the active segment in bytes
    pub(crate) max_active_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(".")
    }
}

impl Config {
    /// Creates a new configuration for the given data directory.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            debug: false,
            read_only: false,
            always_fsync: false,
            sync_interval: None,
            compact_interval: DEFAULT_COMPACT_INTERVAL,
            check_file_size_interval: DEFAULT_FILE_SIZE_INTERVAL,
            max_active_file_size: DEFAULT_MAX_ACTIVE_FILE_SIZE,
        }
    }

    /// Enables verbose logging.
    ///
    /// The store itself always logs through the `log` facade; this flag is
    /// honored by consumers (e.g. the demo binary) when picking a log level.
    ///
    /// Default = false
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Opens the store in read-only mode.
    ///
    /// A read-only store rejects all mutating operations, does not take the
    /// directory lock and starts no background workers.
    ///
    /// Default = false
    #[must_use]
    pub fn read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }

    /// Flushes the active segment to stable storage after every put.
    ///
    /// Durable, but slow; consider [`Config::sync_interval`] instead.
    ///
    /// Default = false
    #[must_use]
    pub fn always_fsync(mut self, enabled: bool) -> Self {
        self.always_fsync = enabled;
        self
    }

    /// Syncs the active segment on the given cadence.
    ///
    /// Only effective when `always_fsync` is disabled.
    ///
    /// Default = no periodic sync
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets how often expired keys are dropped and stale segments merged.
    ///
    /// Default = 6 hours
    #[must_use]
    pub fn compact_interval(mut self, interval: Duration) -> Self {
        self.compact_interval = interval;
        self
    }

    /// Sets how often the active segment's size is checked for rotation.
    ///
    /// Default = 1 minute
    #[must_use]
    pub fn check_file_size_interval(mut self, interval: Duration) -> Self {
        self.check_file_size_interval = interval;
        self
    }

    /// Sets the rotation threshold of the active segment.
    ///
    /// Once the active segment reaches this size, it is sealed and a new
    /// active segment is started.
    ///
    /// Default = 4 GiB
    #[must_use]
    pub fn max_active_file_size(mut self, bytes: u64) -> Self {
        self.max_active_file_size = bytes;
        self
    }
}
