//! Owns the three file descriptors that make up one store: the data file's
//! append and read handles, and the WAL's append handle. Also owns the
//! cross-process exclusive lock and the atomic-replace primitive used by
//! index saves and vacuum.

use crate::codec::DATA_FILE_MAGIC;
use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct FilePaths {
	pub data: PathBuf,
	pub index: PathBuf,
	pub wal: PathBuf,
}

impl FilePaths {
	pub fn new(base: &Path) -> FilePaths {
		let with_suffix = |suffix: &str| {
			let mut s = base.as_os_str().to_owned();
			s.push(suffix);
			PathBuf::from(s)
		};
		FilePaths {
			data: with_suffix(".data.bin"),
			index: with_suffix(".index.bin"),
			wal: with_suffix(".wal.bin"),
		}
	}
}

pub struct FileManager {
	paths: FilePaths,
	data_append: File,
	data_read: File,
	wal_append: Option<File>,
	locked: bool,
	/// Cached size of the data file, kept in sync on every append and on
	/// vacuum's rebuild so read-only stat queries (`fragmentation_ratio`,
	/// `get_stats`) don't need a mutable seek.
	size: u64,
}

impl FileManager {
	/// Opens the data file for append, takes the exclusive advisory lock,
	/// writes the header if the file is new, and opens the read handle.
	/// Does not open the WAL handle yet: recovery must load the index and
	/// replay the WAL before a fresh append handle for it is created.
	pub fn open(base: &Path) -> Result<FileManager> {
		let paths = FilePaths::new(base);

		let mut data_append = OpenOptions::new().create(true).append(true).open(&paths.data)?;
		match data_append.try_lock_exclusive() {
			Ok(()) => log::debug!(target: "blobcache", "Lock acquired on {}", paths.data.display()),
			Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(Error::Busy),
			Err(e) => return Err(Error::Io(e)),
		}

		let mut size = data_append.seek(SeekFrom::End(0))?;
		if size == 0 {
			data_append.write_all(DATA_FILE_MAGIC)?;
			data_append.flush()?;
			size = DATA_FILE_MAGIC.len() as u64;
		} else {
			log::debug!(target: "blobcache", "Datafile of size {} bytes found.", size);
			verify_header(&paths.data)?;
		}

		let data_read = File::open(&paths.data)?;

		Ok(FileManager { paths, data_append, data_read, wal_append: None, locked: true, size })
	}

	pub fn paths(&self) -> &FilePaths {
		&self.paths
	}

	/// Opens (or creates) the WAL append handle. Called once, after the
	/// index has been loaded and the WAL replayed.
	pub fn open_wal_append(&mut self) -> Result<()> {
		let wal_append = OpenOptions::new().create(true).append(true).open(&self.paths.wal)?;
		self.wal_append = Some(wal_append);
		Ok(())
	}

	/// Appends one value frame to the data file and flushes it. Returns
	/// the frame's start offset and its full on-disk length.
	pub fn append_data_frame(&mut self, frame: &[u8]) -> Result<(u64, u32)> {
		let start = self.size;
		self.data_append.write_all(frame)?;
		self.data_append.flush()?;
		self.size += frame.len() as u64;
		Ok((start, frame.len() as u32))
	}

	/// Reads exactly `len` bytes starting at `start` from the data file's
	/// read handle. Every call seeks explicitly, so callers must not assume
	/// a persistent seek offset across calls.
	pub fn read_frame(&mut self, start: u64, len: u32) -> Result<Vec<u8>> {
		self.data_read.seek(SeekFrom::Start(start))?;
		let mut buf = vec![0u8; len as usize];
		self.data_read.read_exact(&mut buf)?;
		Ok(buf)
	}

	pub fn data_file_size(&self) -> u64 {
		self.size
	}

	/// Appends and flushes one WAL record. `open_wal_append` must have
	/// been called first.
	pub fn append_wal(&mut self, record: &[u8]) -> Result<()> {
		let wal = self.wal_append.as_mut().expect("WAL append handle not open");
		wal.write_all(record)?;
		wal.flush()?;
		Ok(())
	}

	/// Writes `temp` fully, then renames it over `target`. Both must live
	/// in the same directory so the rename is atomic on POSIX filesystems.
	pub fn atomic_replace(temp: &Path, target: &Path, contents: &[u8]) -> Result<()> {
		{
			let mut f = File::create(temp)?;
			f.write_all(contents)?;
			f.flush()?;
		}
		fs::rename(temp, target)?;
		Ok(())
	}

	/// Reopens the data file's append and read handles, used after
	/// `vacuum` renames a freshly-built file over the live one.
	pub fn reopen_data(&mut self) -> Result<()> {
		let data_append = OpenOptions::new().create(true).append(true).open(&self.paths.data)?;
		data_append.try_lock_exclusive().map_err(|e| {
			if e.kind() == ErrorKind::WouldBlock {
				Error::Busy
			} else {
				Error::Io(e)
			}
		})?;
		self.size = std::fs::metadata(&self.paths.data)?.len();
		self.data_append = data_append;
		self.data_read = File::open(&self.paths.data)?;
		Ok(())
	}

	/// Closes the read, WAL, then (after releasing the lock) the append
	/// descriptor, in that order.
	pub fn close(mut self) -> Result<()> {
		drop(self.data_read);
		self.wal_append.take();
		if self.locked {
			self.data_append.unlock().ok();
			self.locked = false;
		}
		drop(self.data_append);
		Ok(())
	}
}

fn verify_header(path: &Path) -> Result<()> {
	let mut f = File::open(path)?;
	let mut header = [0u8; DATA_FILE_MAGIC.len()];
	match f.read_exact(&mut header) {
		Ok(()) => {}
		Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
			return Err(Error::CorruptRecord("data file shorter than the magic header".into()))
		}
		Err(e) => return Err(Error::Io(e)),
	}
	if &header != DATA_FILE_MAGIC {
		return Err(Error::CorruptRecord("data file magic header does not match".into()));
	}
	Ok(())
}
