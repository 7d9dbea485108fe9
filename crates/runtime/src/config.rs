//! Channel configuration.

use std::time::Duration;

/// Tunables for a [`Channel`](crate::Channel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
	/// Interval handed to the [`Timer`](crate::Timer) while updates are blocked.
	pub update_interval: Duration,
	/// Maximum number of messages buffered per transport before its peer's
	/// `init` arrives. Further messages are dropped with a warning.
	pub handshake_buffer_limit: usize,
}

impl Default for ChannelConfig {
	fn default() -> Self {
		Self {
			update_interval: Duration::from_millis(50),
			handshake_buffer_limit: 1024,
		}
	}
}
