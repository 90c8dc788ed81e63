//! Binary framing for the three on-disk record shapes: the data-file frame,
//! the index-file record and the WAL record. All widths are fixed and
//! little-endian.

use crate::error::{Error, Result};
use crate::index::IndexEntry;
use std::io::{self, Read};

pub const DATA_FILE_MAGIC: &[u8; 18] = b"blob.cache.data.01";

/// An entry read back out of the WAL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalRecord {
	Delete(String),
	Put(String, IndexEntry),
}

// -- data file frame -------------------------------------------------------

/// `[discriminator: u8][compressed_len: u32 LE][compressed_len bytes]`
pub fn encode_data_frame(discriminator: u8, compressed: &[u8]) -> Vec<u8> {
	let mut buf = Vec::with_capacity(1 + 4 + compressed.len());
	buf.push(discriminator);
	buf.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
	buf.extend_from_slice(compressed);
	buf
}

/// Decode a whole frame given its exact byte range (as recorded by the
/// index's `len`). Fails `CorruptRecord` if the declared length does not
/// match the bytes actually available, or the discriminator is not 0/1.
pub fn decode_data_frame(buf: &[u8]) -> Result<(u8, &[u8])> {
	if buf.len() < 5 {
		return Err(Error::CorruptRecord("frame shorter than header".into()));
	}
	let discriminator = buf[0];
	if discriminator != 0 && discriminator != 1 {
		return Err(Error::CorruptRecord(format!("invalid frame discriminator {}", discriminator)));
	}
	let declared_len = u32::from_le_bytes(buf[1..5].try_into().unwrap()) as usize;
	let payload = &buf[5..];
	if payload.len() != declared_len {
		return Err(Error::CorruptRecord(format!(
			"frame declares {} compressed bytes but {} are present",
			declared_len,
			payload.len()
		)));
	}
	Ok((discriminator, payload))
}

// -- index file record -------------------------------------------------------

/// `[key_len: u32 LE][key bytes][start: u64 LE][len: u32 LE][expires: u32 LE]`
pub fn encode_index_record(key: &str, entry: &IndexEntry) -> Vec<u8> {
	let key_bytes = key.as_bytes();
	let mut buf = Vec::with_capacity(4 + key_bytes.len() + 8 + 4 + 4);
	buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
	buf.extend_from_slice(key_bytes);
	buf.extend_from_slice(&entry.start.to_le_bytes());
	buf.extend_from_slice(&entry.len.to_le_bytes());
	buf.extend_from_slice(&entry.expires.to_le_bytes());
	buf
}

/// Reads one index record from `r`. Returns `Ok(None)` at a clean record
/// boundary EOF, or when the tail is truncated partway through a record
/// (both cases are treated as end-of-stream so a torn final record doesn't
/// fail the whole load).
pub fn try_decode_index_record<R: Read>(r: &mut R) -> Result<Option<(String, IndexEntry)>> {
	let key_len = match try_read_u32(r)? {
		Some(n) => n,
		None => return Ok(None),
	};
	if key_len == 0 {
		return Err(Error::CorruptRecord("zero-length key in index record".into()));
	}
	let key_bytes = match try_read_exact(r, key_len as usize)? {
		Some(b) => b,
		None => return Ok(None),
	};
	let key = String::from_utf8(key_bytes)
		.map_err(|e| Error::CorruptRecord(format!("index key is not valid utf-8: {}", e)))?;
	let tail = match try_read_exact(r, 16)? {
		Some(b) => b,
		None => return Ok(None),
	};
	let start = u64::from_le_bytes(tail[0..8].try_into().unwrap());
	let len = u32::from_le_bytes(tail[8..12].try_into().unwrap());
	let expires = u32::from_le_bytes(tail[12..16].try_into().unwrap());
	Ok(Some((key, IndexEntry { start, len, expires })))
}

// -- WAL record -------------------------------------------------------

/// `[key_len: u32 LE][key bytes][op: u8][...]`, op 0 = delete (no tail), op
/// 1 = put, followed by `[start: u64 LE][len: u32 LE][expires: u32 LE]`.
pub fn encode_wal_put(key: &str, entry: &IndexEntry) -> Vec<u8> {
	let key_bytes = key.as_bytes();
	let mut buf = Vec::with_capacity(4 + key_bytes.len() + 1 + 8 + 4 + 4);
	buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
	buf.extend_from_slice(key_bytes);
	buf.push(1);
	buf.extend_from_slice(&entry.start.to_le_bytes());
	buf.extend_from_slice(&entry.len.to_le_bytes());
	buf.extend_from_slice(&entry.expires.to_le_bytes());
	buf
}

pub fn encode_wal_delete(key: &str) -> Vec<u8> {
	let key_bytes = key.as_bytes();
	let mut buf = Vec::with_capacity(4 + key_bytes.len() + 1);
	buf.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
	buf.extend_from_slice(key_bytes);
	buf.push(0);
	buf
}

/// Reads one WAL record from `r`. See `try_decode_index_record` for the
/// end-of-stream convention.
pub fn try_decode_wal_record<R: Read>(r: &mut R) -> Result<Option<WalRecord>> {
	let key_len = match try_read_u32(r)? {
		Some(n) => n,
		None => return Ok(None),
	};
	if key_len == 0 {
		return Err(Error::CorruptRecord("zero-length key in WAL record".into()));
	}
	let key_bytes = match try_read_exact(r, key_len as usize)? {
		Some(b) => b,
		None => return Ok(None),
	};
	let key = String::from_utf8(key_bytes)
		.map_err(|e| Error::CorruptRecord(format!("WAL key is not valid utf-8: {}", e)))?;
	let op = match try_read_exact(r, 1)? {
		Some(b) => b[0],
		None => return Ok(None),
	};
	match op {
		0 => Ok(Some(WalRecord::Delete(key))),
		1 => {
			let tail = match try_read_exact(r, 16)? {
				Some(b) => b,
				None => return Ok(None),
			};
			let start = u64::from_le_bytes(tail[0..8].try_into().unwrap());
			let len = u32::from_le_bytes(tail[8..12].try_into().unwrap());
			let expires = u32::from_le_bytes(tail[12..16].try_into().unwrap());
			Ok(Some(WalRecord::Put(key, IndexEntry { start, len, expires })))
		}
		other => Err(Error::CorruptRecord(format!("invalid WAL op flag {}", other))),
	}
}

// -- shared helpers -------------------------------------------------------

fn try_read_exact<R: Read>(r: &mut R, n: usize) -> Result<Option<Vec<u8>>> {
	let mut buf = vec![0u8; n];
	let mut filled = 0;
	while filled < n {
		match r.read(&mut buf[filled..]) {
			// EOF, whether clean (filled == 0) or mid-record (filled > 0):
			// both are treated as end-of-stream so a torn tail doesn't fail the load.
			Ok(0) => return Ok(None),
			Ok(read) => filled += read,
			Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(Error::Io(e)),
		}
	}
	Ok(Some(buf))
}

fn try_read_u32<R: Read>(r: &mut R) -> Result<Option<u32>> {
	match try_read_exact(r, 4)? {
		Some(b) => Ok(Some(u32::from_le_bytes(b.try_into().unwrap()))),
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn data_frame_round_trip() {
		let frame = encode_data_frame(1, b"hello");
		let (d, payload) = decode_data_frame(&frame).unwrap();
		assert_eq!(d, 1);
		assert_eq!(payload, b"hello");
	}

	#[test]
	fn data_frame_bad_discriminator() {
		let mut frame = encode_data_frame(1, b"hello");
		frame[0] = 9;
		assert!(decode_data_frame(&frame).is_err());
	}

	#[test]
	fn index_record_round_trip() {
		let entry = IndexEntry { start: 18, len: 42, expires: 0 };
		let buf = encode_index_record("k1", &entry);
		let mut cursor = io::Cursor::new(buf);
		let (key, decoded) = try_decode_index_record(&mut cursor).unwrap().unwrap();
		assert_eq!(key, "k1");
		assert_eq!(decoded, entry);
		assert!(try_decode_index_record(&mut cursor).unwrap().is_none());
	}

	#[test]
	fn wal_delete_round_trip() {
		let buf = encode_wal_delete("k1");
		let mut cursor = io::Cursor::new(buf);
		match try_decode_wal_record(&mut cursor).unwrap().unwrap() {
			WalRecord::Delete(k) => assert_eq!(k, "k1"),
			_ => panic!("expected delete"),
		}
	}

	#[test]
	fn wal_truncated_tail_is_end_of_stream() {
		let entry = IndexEntry { start: 1, len: 2, expires: 0 };
		let mut buf = encode_wal_put("k1", &entry);
		buf.truncate(buf.len() - 3);
		let mut cursor = io::Cursor::new(buf);
		assert!(try_decode_wal_record(&mut cursor).unwrap().is_none());
	}
}
