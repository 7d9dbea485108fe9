//! Timer capability driving batched property flushes.

use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::channel::Shared;
use crate::error::{Error, Result};

/// Periodic trigger for [`Channel::timer_event`](crate::Channel::timer_event).
///
/// The channel calls `start` when updates become blocked and `stop` once a
/// flush finds updates unblocked. Both run under the channel's timer lock, so
/// a start never interleaves with a stop. Implementations must not fire the
/// tick from inside either call.
pub trait Timer: Send + Sync {
	/// Starts firing `tick` every `interval`. An error leaves the timer
	/// stopped; the channel retries on the next `block_updates`.
	fn start(&self, interval: Duration, tick: TimerTick) -> Result<()>;
	fn stop(&self);
}

/// Callback handed to a [`Timer`].
#[derive(Clone)]
pub struct TimerTick {
	channel: Weak<Shared>,
}

impl TimerTick {
	pub(crate) fn new(channel: Weak<Shared>) -> Self {
		Self { channel }
	}

	/// Runs one flush. Returns false once the channel is gone, after which
	/// the timer should stop firing.
	pub fn fire(&self) -> bool {
		match self.channel.upgrade() {
			Some(shared) => {
				shared.timer_event();
				true
			}
			None => false,
		}
	}
}

/// Timer that never fires; the embedder calls `timer_event` itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTimer;

impl Timer for NoopTimer {
	fn start(&self, _interval: Duration, _tick: TimerTick) -> Result<()> {
		Ok(())
	}
	fn stop(&self) {}
}

/// Timer backed by a `tokio::time::interval` task.
#[derive(Debug, Default)]
pub struct TokioTimer {
	task: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTimer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_running(&self) -> bool {
		self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
	}
}

impl Timer for TokioTimer {
	fn start(&self, interval: Duration, tick: TimerTick) -> Result<()> {
		let handle = Handle::try_current()
			.map_err(|e| Error::Timer(format!("no tokio runtime: {e}")))?;

		let task = handle.spawn(async move {
			let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				if !tick.fire() {
					break;
				}
			}
		});

		if let Some(previous) = self.task.lock().replace(task) {
			previous.abort();
		}
		Ok(())
	}

	fn stop(&self) {
		if let Some(task) = self.task.lock().take() {
			task.abort();
		}
	}
}

impl Drop for TokioTimer {
	fn drop(&mut self) {
		if let Some(task) = self.task.get_mut().take() {
			task.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_orphan_tick_reports_gone() {
		assert!(!TimerTick::new(Weak::new()).fire());
	}

	#[tokio::test]
	async fn test_tokio_timer_stops_when_channel_gone() {
		let timer = TokioTimer::new();
		timer
			.start(Duration::from_millis(1), TimerTick::new(Weak::new()))
			.unwrap();
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert!(!timer.is_running());
	}

	#[tokio::test]
	async fn test_tokio_timer_stop() {
		let timer = TokioTimer::new();
		timer
			.start(Duration::from_secs(60), TimerTick::new(Weak::new()))
			.unwrap();
		assert!(timer.is_running());
		timer.stop();
		assert!(!timer.is_running());
	}

	#[test]
	fn test_tokio_timer_start_outside_runtime_fails() {
		let timer = TokioTimer::new();
		let result = timer.start(Duration::from_millis(1), TimerTick::new(Weak::new()));
		assert!(matches!(result, Err(Error::Timer(_))));
		assert!(!timer.is_running());
	}
}
