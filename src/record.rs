// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Fixed on-disk size of an encoded [`Header`]
pub const HEADER_SIZE: usize = 20;

/// Fixed-width record header, preceding the key and value bytes on disk.
///
/// All fields are little-endian u32s, in declared order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    /// IEEE CRC-32 of the value bytes
    pub crc: u32,

    /// Wall-clock seconds at write time
    pub tstamp: u32,

    /// Wall-clock seconds after which the record is dead, 0 = never
    pub expiry: u32,

    /// Key length in bytes
    pub ksz: u32,

    /// Value length in bytes
    pub vsz: u32,
}

impl Encode for Header {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.crc)?;
        writer.write_u32::<LittleEndian>(self.tstamp)?;
        writer.write_u32::<LittleEndian>(self.expiry)?;
        writer.write_u32::<LittleEndian>(self.ksz)?;
        writer.write_u32::<LittleEndian>(self.vsz)?;
        Ok(())
    }
}

impl Decode for Header {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let crc = reader.read_u32::<LittleEndian>()?;
        let tstamp = reader.read_u32::<LittleEndian>()?;
        let expiry = reader.read_u32::<LittleEndian>()?;
        let ksz = reader.read_u32::<LittleEndian>()?;
        let vsz = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            crc,
            tstamp,
            expiry,
            ksz,
            vsz,
        })
    }
}

/// A fully decoded record
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Record {
    pub header: Header,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Parses a record from the exact byte range stored in the key directory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = bytes;
        let header = Header::decode_from(&mut reader)?;

        if reader.len() as u64 != u64::from(header.ksz) + u64::from(header.vsz) {
            return Err(DecodeError::InvalidLength("record"));
        }

        let (key, value) = reader.split_at(header.ksz as usize);

        Ok(Self {
            header,
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    pub fn is_expired(&self, now: u32) -> bool {
        self.header.expiry != 0 && self.header.expiry < now
    }

    pub fn is_valid_checksum(&self) -> bool {
        crc32fast::hash(&self.value) == self.header.crc
    }
}

/// Current wall-clock time in whole seconds.
pub(crate) fn now_secs() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};

    // NOTE: Truncation is OK until 2106
    #[allow(clippy::cast_possible_truncation)]
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use test_log::test;

    fn full_record_bytes(header: &Header, key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut bytes = header.encode_into_vec().unwrap();
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(value);
        bytes
    }

    #[test]
    fn header_layout() {
        let header = Header {
            crc: 1,
            tstamp: 2,
            expiry: 3,
            ksz: 4,
            vsz: 5,
        };

        let bytes = header.encode_into_vec().unwrap();
        assert_eq!(HEADER_SIZE, bytes.len());
        assert_eq!(
            &[
                1, 0, 0, 0, //
                2, 0, 0, 0, //
                3, 0, 0, 0, //
                4, 0, 0, 0, //
                5, 0, 0, 0,
            ],
            &*bytes,
        );
    }

    #[test]
    fn header_round_trip() {
        let header = Header {
            crc: 0xDEAD_BEEF,
            tstamp: 1_700_000_000,
            expiry: 0,
            ksz: 3,
            vsz: 12,
        };

        let bytes = header.encode_into_vec().unwrap();
        let decoded = Header::decode_from(&mut &*bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn record_round_trip() {
        let value = b"world".to_vec();

        let header = Header {
            crc: crc32fast::hash(&value),
            tstamp: 500,
            expiry: 0,
            ksz: 5,
            vsz: 5,
        };

        let bytes = full_record_bytes(&header, b"hello", &value);
        let record = Record::from_bytes(&bytes).unwrap();

        assert_eq!(b"hello".to_vec(), record.key);
        assert_eq!(value, record.value);
        assert!(record.is_valid_checksum());
    }

    #[test]
    fn record_length_mismatch() {
        let header = Header {
            ksz: 5,
            vsz: 100,
            ..Default::default()
        };

        let bytes = full_record_bytes(&header, b"hello", b"short");
        assert!(Record::from_bytes(&bytes).is_err());
    }

    #[test]
    fn expiry() {
        let mut record = Record {
            header: Header::default(),
            key: b"a".to_vec(),
            value: vec![],
        };

        assert!(!record.is_expired(u32::MAX));

        record.header.expiry = 1_000;
        assert!(record.is_expired(1_001));
        assert!(!record.is_expired(1_000));
        assert!(!record.is_expired(999));
    }

    #[test]
    fn checksum_mismatch() {
        let value = b"hello".to_vec();

        let record = Record {
            header: Header {
                crc: crc32fast::hash(b"Hello"),
                vsz: 5,
                ksz: 1,
                ..Default::default()
            },
            key: b"k".to_vec(),
            value,
        };

        assert!(!record.is_valid_checksum());
    }
}
