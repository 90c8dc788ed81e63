//! The in-memory locator map. Keys are unique; iteration order is not part
//! of the contract, so a plain `HashMap` is the right tool here — there is
//! no range-scan requirement over keys.

use std::collections::HashMap;

/// Locator for one key's frame in the data file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
	/// Offset of the frame's discriminator byte in the data file.
	pub start: u64,
	/// Full on-disk length of the frame, discriminator and length prefix
	/// included. `vacuum` relies on this to copy a whole frame with one
	/// read instead of re-deriving its length from the frame body.
	pub len: u32,
	/// Absolute expiration, in seconds since the epoch. 0 means "never".
	pub expires: u32,
}

impl IndexEntry {
	pub fn is_live(&self, now: u32) -> bool {
		self.expires == 0 || self.expires > now
	}
}

pub type Index = HashMap<String, IndexEntry>;
