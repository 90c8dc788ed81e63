//! Append-only, crash-recoverable persistent key-value store.
//!
//! Values are compressed and concatenated into one append-only data file;
//! keys and value locators live in an in-memory index, and every mutation
//! is journaled to a write-ahead log before it is considered applied. On
//! open, the index file is loaded and the WAL is replayed on top of it to
//! reconstruct the authoritative key map.
//!
//! Exactly one process may hold a given store open at a time; a second
//! `Store::open` on the same base path fails with [`Error::Busy`].
//!
//! ```no_run
//! use blobcache::{Options, Store};
//!
//! let mut store = Store::open("/tmp/my-cache", Options::default())?;
//! store.set("greeting", "hello", None)?;
//! let value = store.get("greeting")?;
//! assert_eq!(value.as_json().and_then(|v| v.as_str()), Some("hello"));
//! store.close()?;
//! # Ok::<(), blobcache::Error>(())
//! ```

mod codec;
mod compress;
mod files;
mod index;
mod recovery;

pub mod error;
pub mod options;
pub mod stats;
pub mod store;
pub mod value;

pub use crate::error::{Error, Result};
pub use crate::options::Options;
pub use crate::stats::Stats;
pub use crate::store::Store;
pub use crate::value::Value;
