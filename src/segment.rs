// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::Decode,
    record::{Header, HEADER_SIZE},
};
use std::{
    fs::{File, OpenOptions},
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

/// Segment ID, also the numeric part of the segment's file name
pub type SegmentId = u64;

pub(crate) const SEGMENT_PREFIX: &str = "bitcaspy";
pub(crate) const SEGMENT_SUFFIX: &str = ".db";

/// Returns the path of the segment file with the given ID.
pub(crate) fn segment_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{id}{SEGMENT_SUFFIX}"))
}

fn parse_segment_file_name(name: &str) -> Option<SegmentId> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse::<SegmentId>()
        .ok()
}

/// Enumerates the IDs of all segment files in the directory, ascending.
///
/// Files that do not follow the `bitcaspy<id>.db` naming scheme (hint file,
/// lock file, .DS_Store, ...) are skipped.
pub(crate) fn list_segment_ids(dir: &Path) -> crate::Result<Vec<SegmentId>> {
    let mut ids = vec![];

    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;

        if !dirent.file_type()?.is_file() {
            continue;
        }

        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if let Some(id) = parse_segment_file_name(name) {
            ids.push(id);
        }
    }

    ids.sort_unstable();

    Ok(ids)
}

fn read_exact_at(file: &File, buf: &mut [u8], pos: u64) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, pos)
    }

    #[cfg(windows)]
    #[allow(clippy::indexing_slicing)]
    {
        use std::os::windows::fs::FileExt;

        let mut buf = buf;
        let mut pos = pos;

        while !buf.is_empty() {
            match file.seek_read(buf, pos) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    pos += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

/// One numbered append-only data file.
///
/// Writes always go through the append descriptor at end-of-file; any valid
/// record range can be read concurrently through the positional-read
/// descriptor.
pub(crate) struct Segment {
    id: SegmentId,
    path: PathBuf,

    writer: File,
    reader: File,

    /// Running end-of-file offset
    offset: u64,
}

impl Segment {
    /// Opens the segment file with the given ID, creating it if missing.
    pub fn open(dir: &Path, id: SegmentId) -> std::io::Result<Self> {
        let path = segment_path(dir, id);

        let writer = OpenOptions::new().create(true).append(true).open(&path)?;
        let reader = File::open(&path)?;

        let offset = writer.metadata()?.len();

        Ok(Self {
            id,
            path,
            writer,
            reader,
            offset,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end-of-file offset.
    pub fn size(&self) -> u64 {
        self.offset
    }

    /// Appends the bytes at end-of-file, returning the new end offset.
    pub fn append(&mut self, bytes: &[u8]) -> std::io::Result<u64> {
        if let Err(e) = self.writer.write_all(bytes) {
            // A torn write may still have advanced the file; resync the
            // running offset so later appends stay addressable
            if let Ok(meta) = self.writer.metadata() {
                self.offset = meta.len();
            }
            return Err(e);
        }

        self.offset += bytes.len() as u64;

        Ok(self.offset)
    }

    /// Reads exactly `size` bytes *ending* at `end_pos`.
    pub fn read_at(&self, end_pos: u64, size: u32) -> crate::Result<Vec<u8>> {
        let size_u64 = u64::from(size);

        let Some(start) = end_pos.checked_sub(size_u64) else {
            return Err(crate::Error::ShortRead);
        };

        let mut buf = vec![0; size as usize];

        read_exact_at(&self.reader, &mut buf, start).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                crate::Error::ShortRead
            } else {
                crate::Error::Io(e)
            }
        })?;

        Ok(buf)
    }

    /// Flushes written data to stable storage.
    pub fn sync(&self) -> std::io::Result<()> {
        self.writer.sync_all()
    }

    /// Syncs and closes the segment.
    pub fn close(self) -> std::io::Result<()> {
        self.writer.sync_all()
    }
}

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                return Some(Err(e.into()));
            }
        }
    };
}

/// A record yielded by [`Scanner`], value bytes skipped.
pub(crate) struct ScannedRecord {
    pub header: Header,
    pub key: Vec<u8>,

    /// End offset of the record within its segment
    pub record_pos: u64,

    /// Total on-disk length of the record
    pub record_size: u32,
}

/// Reads through a segment in order, yielding record positions.
///
/// Used to rebuild the key directory when the hint file is unusable. A torn
/// record at the end of the file terminates the scan with a warning rather
/// than an error.
pub(crate) struct Scanner {
    segment_id: SegmentId,
    inner: BufReader<File>,
    offset: u64,
    file_len: u64,
    is_terminated: bool,
}

impl Scanner {
    pub fn new(path: &Path, segment_id: SegmentId) -> crate::Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            segment_id,
            inner: BufReader::new(file),
            offset: 0,
            file_len,
            is_terminated: false,
        })
    }

    fn truncated_tail(&mut self) -> Option<<Self as Iterator>::Item> {
        log::warn!(
            "Torn record at offset {} of segment {}, ignoring tail",
            self.offset,
            self.segment_id,
        );
        self.is_terminated = true;
        None
    }
}

impl Iterator for Scanner {
    type Item = crate::Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_terminated {
            return None;
        }

        if self.offset >= self.file_len {
            self.is_terminated = true;
            return None;
        }

        let mut header_buf = [0; HEADER_SIZE];

        if let Err(e) = self.inner.read_exact(&mut header_buf) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return self.truncated_tail();
            }
            self.is_terminated = true;
            return Some(Err(e.into()));
        }

        let header = fail_iter!(Header::decode_from(&mut header_buf.as_slice()));

        let record_size =
            HEADER_SIZE as u64 + u64::from(header.ksz) + u64::from(header.vsz);

        if self.offset + record_size > self.file_len {
            return self.truncated_tail();
        }

        let mut key = vec![0; header.ksz as usize];
        fail_iter!(self.inner.read_exact(&mut key));

        // The value is not needed for index rebuild
        fail_iter!(self.inner.seek_relative(header.vsz as i64));

        self.offset += record_size;

        // NOTE: ksz and vsz are validated against the file length above
        #[allow(clippy::cast_possible_truncation)]
        Some(Ok(ScannedRecord {
            header,
            key,
            record_pos: self.offset,
            record_size: record_size as u32,
        }))
    }
}
