//! Binary encoding of [`FileRecord`]s.
//!
//! All integers are little-endian.
//!
//! ```text
//! collection header (8 bytes):  magic:u32 = 0x17936825, count:u32
//! entry header     (32 bytes):  size:i64, mtime_micros:i64, mode:u32, name_len:u32, user_tag:u64
//! entry name   (name_len bytes), immediately after its header
//! ```
//!
//! A single stub omits the collection header and holds exactly one entry.
//! Decoding is all-or-nothing: a truncated buffer yields an error and no
//! partial records.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CodecError, CodecResult};
use crate::types::{FileMode, FileRecord, from_micros};

/// Collection magic tag.
pub const MAGIC: u32 = 0x1793_6825;

/// Length of the collection header.
pub const HEADER_LEN: usize = 8;

/// Length of an entry header (excluding the name).
pub const ENTRY_HEADER_LEN: usize = 32;

/// Encoded size of one entry.
pub fn entry_size(record: &FileRecord) -> usize {
    ENTRY_HEADER_LEN + record.name.len()
}

/// Encoded size of a whole collection.
pub fn size_of(records: &[FileRecord]) -> usize {
    HEADER_LEN + records.iter().map(entry_size).sum::<usize>()
}

/// Write the collection header, returning the rest of the buffer.
///
/// # Panics
///
/// Panics if `buf` is shorter than [`HEADER_LEN`].
pub fn write_header(buf: &mut [u8], count: usize) -> &mut [u8] {
    LittleEndian::write_u32(&mut buf[0..4], MAGIC);
    LittleEndian::write_u32(&mut buf[4..8], count as u32);
    &mut buf[HEADER_LEN..]
}

/// Write one entry, returning the rest of the buffer.
///
/// # Panics
///
/// Panics if `buf` is shorter than [`entry_size`] of `record`.
pub fn write_entry<'a>(buf: &'a mut [u8], record: &FileRecord) -> &'a mut [u8] {
    let name = record.name.as_bytes();
    LittleEndian::write_i64(&mut buf[0..8], record.size);
    LittleEndian::write_i64(&mut buf[8..16], record.mtime_micros());
    LittleEndian::write_u32(&mut buf[16..20], record.mode.bits());
    LittleEndian::write_u32(&mut buf[20..24], name.len() as u32);
    LittleEndian::write_u64(&mut buf[24..32], record.user_tag);
    let end = ENTRY_HEADER_LEN + name.len();
    buf[ENTRY_HEADER_LEN..end].copy_from_slice(name);
    &mut buf[end..]
}

/// Encode a collection of records, in input order.
pub fn encode(records: &[FileRecord]) -> Vec<u8> {
    let mut buf = vec![0u8; size_of(records)];
    let mut rest = write_header(&mut buf, records.len());
    for record in records {
        rest = write_entry(rest, record);
    }
    buf
}

/// Decode a collection produced by [`encode`].
pub fn decode(buf: &[u8]) -> CodecResult<Vec<FileRecord>> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::HeaderTooShort);
    }
    if LittleEndian::read_u32(&buf[0..4]) != MAGIC {
        return Err(CodecError::TagUnmatched);
    }
    let count = LittleEndian::read_u32(&buf[4..8]) as usize;

    // Each entry needs at least a header; don't trust `count` for allocation.
    let mut records = Vec::with_capacity(count.min(buf.len() / ENTRY_HEADER_LEN));
    let mut rest = &buf[HEADER_LEN..];
    for _ in 0..count {
        let (record, tail) = read_entry(rest)?;
        records.push(record);
        rest = tail;
    }
    Ok(records)
}

/// Encode a single record without the collection header.
pub fn encode_one(record: &FileRecord) -> Vec<u8> {
    let mut buf = vec![0u8; entry_size(record)];
    write_entry(&mut buf, record);
    buf
}

/// Decode a single record produced by [`encode_one`].
pub fn decode_one(buf: &[u8]) -> CodecResult<FileRecord> {
    read_entry(buf).map(|(record, _)| record)
}

fn read_entry(buf: &[u8]) -> CodecResult<(FileRecord, &[u8])> {
    if buf.len() < ENTRY_HEADER_LEN {
        return Err(CodecError::EntryTooShort);
    }
    let size = LittleEndian::read_i64(&buf[0..8]);
    let mtime = LittleEndian::read_i64(&buf[8..16]);
    let mode = LittleEndian::read_u32(&buf[16..20]);
    let name_len = LittleEndian::read_u32(&buf[20..24]) as usize;
    let user_tag = LittleEndian::read_u64(&buf[24..32]);

    let data = &buf[ENTRY_HEADER_LEN..];
    if data.len() < name_len {
        return Err(CodecError::DataTooShort);
    }
    let name = std::str::from_utf8(&data[..name_len]).map_err(|_| CodecError::InvalidName)?;

    let record = FileRecord {
        name: name.to_owned(),
        size,
        mtime: from_micros(mtime),
        mode: FileMode::from_bits(mode),
        user_tag,
    };
    Ok((record, &data[name_len..]))
}
