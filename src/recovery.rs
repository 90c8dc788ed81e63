//! Open-time index load plus WAL replay, and the index-save/WAL-truncate
//! half of the same protocol.
//!
//! `load` persists the merged index before removing the WAL, so a crash
//! between WAL replay and the next `close`/`vacuum` never loses an
//! acknowledged write.

use crate::codec::{try_decode_index_record, try_decode_wal_record, WalRecord};
use crate::error::Result;
use crate::files::FilePaths;
use crate::index::Index;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Loads the index file (if any), replays the WAL on top of it (if any),
/// then persists the merged result and removes the WAL. Returns the
/// reconstructed index.
pub fn load(paths: &FilePaths, now: u32) -> Result<Index> {
	let mut index = Index::new();

	if paths.index.exists() {
		log::debug!(target: "blobcache", "Loading index file...");
		let mut reader = BufReader::new(File::open(&paths.index)?);
		while let Some((key, entry)) = try_decode_index_record(&mut reader)? {
			if entry.is_live(now) {
				index.insert(key, entry);
			}
		}
	}

	if paths.wal.exists() {
		log::debug!(target: "blobcache", "Replaying WAL file...");
		let mut reader = BufReader::new(File::open(&paths.wal)?);
		while let Some(record) = try_decode_wal_record(&mut reader)? {
			match record {
				WalRecord::Put(key, entry) => {
					if entry.is_live(now) {
						index.insert(key, entry);
					} else {
						index.remove(&key);
					}
				}
				WalRecord::Delete(key) => {
					index.remove(&key);
				}
			}
		}
		save(paths, &index)?;
	}

	log::debug!(target: "blobcache", "Index loaded with {} keys.", index.len());
	Ok(index)
}

/// Writes the index to `<index>.tmp`, renames it over the real index file,
/// then removes the WAL file if one is present.
pub fn save(paths: &FilePaths, index: &Index) -> Result<()> {
	log::debug!(target: "blobcache", "Saving index file...");
	let tmp = temp_path(&paths.index);
	let mut buf = Vec::new();
	for (key, entry) in index.iter() {
		buf.extend_from_slice(&crate::codec::encode_index_record(key, entry));
	}
	crate::files::FileManager::atomic_replace(&tmp, &paths.index, &buf)?;

	if paths.wal.exists() {
		std::fs::remove_file(&paths.wal)?;
	}
	Ok(())
}

fn temp_path(target: &Path) -> std::path::PathBuf {
	let mut s = target.as_os_str().to_owned();
	s.push(".tmp");
	std::path::PathBuf::from(s)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::index::IndexEntry;

	#[test]
	fn save_then_load_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let base = dir.path().join("store");
		let paths = FilePaths::new(&base);

		let mut index = Index::new();
		index.insert("a".to_owned(), IndexEntry { start: 18, len: 10, expires: 0 });
		index.insert("b".to_owned(), IndexEntry { start: 28, len: 5, expires: 0 });
		save(&paths, &index).unwrap();

		let loaded = load(&paths, 0).unwrap();
		assert_eq!(loaded.len(), 2);
		assert_eq!(loaded.get("a"), index.get("a"));
	}

	#[test]
	fn expired_records_are_dropped_on_load() {
		let dir = tempfile::tempdir().unwrap();
		let base = dir.path().join("store");
		let paths = FilePaths::new(&base);

		let mut index = Index::new();
		index.insert("gone".to_owned(), IndexEntry { start: 0, len: 1, expires: 10 });
		save(&paths, &index).unwrap();

		let loaded = load(&paths, 1000).unwrap();
		assert!(loaded.is_empty());
	}

	#[test]
	fn wal_replay_merges_puts_and_deletes_and_removes_wal() {
		let dir = tempfile::tempdir().unwrap();
		let base = dir.path().join("store");
		let paths = FilePaths::new(&base);

		let mut index = Index::new();
		index.insert("a".to_owned(), IndexEntry { start: 18, len: 10, expires: 0 });
		save(&paths, &index).unwrap();

		let mut wal = Vec::new();
		wal.extend_from_slice(&crate::codec::encode_wal_delete("a"));
		wal.extend_from_slice(&crate::codec::encode_wal_put(
			"b",
			&IndexEntry { start: 28, len: 6, expires: 0 },
		));
		std::fs::write(&paths.wal, wal).unwrap();

		let loaded = load(&paths, 0).unwrap();
		assert!(!loaded.contains_key("a"));
		assert!(loaded.contains_key("b"));
		assert!(!paths.wal.exists());
	}
}
