use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("store is locked by another process")]
	Busy,
	#[error("store is closed")]
	Closed,
	#[error("invalid key: {0}")]
	InvalidKey(String),
	#[error("key not found or expired")]
	NotFound,
	#[error("corrupt payload: {0}")]
	CorruptPayload(String),
	#[error("corrupt record: {0}")]
	CorruptRecord(String),
	#[error(transparent)]
	Io(#[from] io::Error),
}
