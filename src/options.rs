/// Store-wide configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Options {
	/// Fragmentation ratio above which `close` triggers an automatic
	/// `vacuum`. Must be in `[0, 1]`.
	pub auto_vacuum_threshold: f32,
}

impl Options {
	pub fn with_auto_vacuum_threshold(mut self, threshold: f32) -> Self {
		self.auto_vacuum_threshold = threshold;
		self
	}
}

impl Default for Options {
	fn default() -> Options {
		Options { auto_vacuum_threshold: 0.5 }
	}
}
