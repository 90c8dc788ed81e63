/// Snapshot of the store's running counters, returned by `Store::get_stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
	pub hits: u64,
	pub sets: u64,
	pub deletes: u64,
	pub misses: u64,
	pub refreshes: u64,
	pub fragmentation_ratio: f64,
	pub total_keys: u64,
	pub data_file_size_bytes: u64,
}
