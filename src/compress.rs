//! Whole-buffer deflate compression at a mid-quality level, used for every
//! value frame written to the data file.

use crate::error::{Error, Result};
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

const LEVEL: u32 = 6;

pub fn compress(data: &[u8]) -> Vec<u8> {
	let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::new(LEVEL));
	// Writing to a `Vec<u8>`-backed encoder cannot fail.
	encoder.write_all(data).expect("in-memory zlib encode cannot fail");
	encoder.finish().expect("in-memory zlib encode cannot fail")
}

pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
	let mut decoder = ZlibDecoder::new(Vec::with_capacity(compressed.len() * 2));
	decoder
		.write_all(compressed)
		.map_err(|e| Error::CorruptPayload(format!("zlib inflate failed: {}", e)))?;
	decoder
		.finish()
		.map_err(|e| Error::CorruptPayload(format!("zlib inflate failed: {}", e)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip() {
		let data = b"the quick brown fox jumps over the lazy dog".repeat(8);
		let compressed = compress(&data);
		let back = decompress(&compressed).unwrap();
		assert_eq!(data, back);
	}

	#[test]
	fn garbage_is_corrupt_payload() {
		let err = decompress(b"not zlib data at all").unwrap_err();
		assert!(matches!(err, Error::CorruptPayload(_)));
	}
}
