// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    segment::SegmentId,
    HashMap,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

/// File name of the key directory snapshot inside the data directory
pub(crate) const HINTS_FILE: &str = "bitcaspy.hints";

const MAGIC_BYTES: [u8; 3] = [b'B', b'C', b'H'];
const FORMAT_VERSION: u8 = 1;

/// Points at the byte range of a key's most recent record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Meta {
    /// ID of the segment holding the record
    pub segment_id: SegmentId,

    /// Total on-disk length of the record (header + key + value)
    pub record_size: u32,

    /// Byte offset of the record's *end* within its segment
    pub record_pos: u64,

    /// Wall-clock seconds at write time
    pub tstamp: u32,
}

/// In-memory index mapping each live key to its most recent record.
#[derive(Debug, Default)]
pub(crate) struct KeyDir(HashMap<Vec<u8>, Meta>);

impl KeyDir {
    pub fn get(&self, key: &[u8]) -> Option<&Meta> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: Vec<u8>, meta: Meta) {
        self.0.insert(key, meta);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Meta> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Snapshot of all live keys.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Meta)> {
        self.0.iter()
    }

    /// Writes the hint file, atomically replacing any previous snapshot.
    pub fn encode_file(&self, path: &Path) -> crate::Result<()> {
        log::trace!("Writing key directory snapshot to {}", path.display());

        let folder = path.parent().expect("should have a parent");

        let temp_file = tempfile::NamedTempFile::new_in(folder)?;

        {
            let mut writer = BufWriter::new(temp_file.as_file());
            self.encode_into(&mut writer).map_err(|e| match e {
                EncodeError::Io(e) => crate::Error::Io(e),
            })?;
            writer.flush()?;
        }

        temp_file.as_file().sync_all()?;
        temp_file.persist(path).map_err(|e| crate::Error::Io(e.error))?;

        Ok(())
    }

    /// Loads the hint file.
    ///
    /// Returns `Ok(None)` if the file does not exist; a malformed file
    /// surfaces [`crate::Error::CorruptHint`].
    pub fn decode_file(path: &Path) -> crate::Result<Option<Self>> {
        if !path.try_exists()? {
            return Ok(None);
        }

        let mut reader = BufReader::new(std::fs::File::open(path)?);

        Self::decode_from(&mut reader)
            .map(Some)
            .map_err(crate::Error::CorruptHint)
    }
}

impl Encode for KeyDir {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&MAGIC_BYTES)?;
        writer.write_u8(FORMAT_VERSION)?;

        writer.write_u64::<LittleEndian>(self.0.len() as u64)?;

        for (key, meta) in &self.0 {
            // NOTE: Key length is capped at u32::MAX on the write path
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u32::<LittleEndian>(key.len() as u32)?;
            writer.write_all(key)?;

            writer.write_u64::<LittleEndian>(meta.segment_id)?;
            writer.write_u64::<LittleEndian>(meta.record_pos)?;
            writer.write_u32::<LittleEndian>(meta.record_size)?;
            writer.write_u32::<LittleEndian>(meta.tstamp)?;
        }

        Ok(())
    }
}

impl Decode for KeyDir {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0; MAGIC_BYTES.len()];
        reader.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("hints"));
        }

        let version = reader.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(DecodeError::InvalidHeader("hints version"));
        }

        let cnt = reader.read_u64::<LittleEndian>()?;

        let mut map = HashMap::default();

        for _ in 0..cnt {
            let ksz = reader.read_u32::<LittleEndian>()?;

            let mut key = vec![0; ksz as usize];
            reader.read_exact(&mut key)?;

            let segment_id = reader.read_u64::<LittleEndian>()?;
            let record_pos = reader.read_u64::<LittleEndian>()?;
            let record_size = reader.read_u32::<LittleEndian>()?;
            let tstamp = reader.read_u32::<LittleEndian>()?;

            map.insert(
                key,
                Meta {
                    segment_id,
                    record_size,
                    record_pos,
                    tstamp,
                },
            );
        }

        Ok(Self(map))
    }
}
